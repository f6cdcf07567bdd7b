use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::platform::{Attachment, MessageRef, Platform};

/// How a mirror was emitted; edits and deletes must go back through the same route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorRoute {
    Direct,
    Webhook,
}

/// Parts of the mirror that an edit of the origin does not carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorFraming {
    pub attachments: Vec<Attachment>,
    /// Author name prefixed to the content when the mirror was sent without an identity.
    pub attributed_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub origin: MessageRef,
    pub mirror: MessageRef,
    pub route: MirrorRoute,
    pub framing: MirrorFraming,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheSlot {
    seq: u64,
    entry: CachedMessage,
}

#[derive(Debug, Default)]
struct CacheState {
    next_seq: u64,
    by_origin: HashMap<String, CacheSlot>,
    by_mirror: HashMap<String, String>,
    order: VecDeque<(u64, String)>,
    pending: HashSet<String>,
}

impl CacheState {
    fn evict_oldest(&mut self) -> Option<CachedMessage> {
        while let Some((seq, origin_id)) = self.order.pop_front() {
            let live = self
                .by_origin
                .get(&origin_id)
                .is_some_and(|slot| slot.seq == seq);
            if live {
                return self.remove(&origin_id);
            }
        }
        None
    }

    fn remove(&mut self, origin_id: &str) -> Option<CachedMessage> {
        let slot = self.by_origin.remove(origin_id)?;
        self.by_mirror.remove(&slot.entry.mirror.message_id);
        Some(slot.entry)
    }
}

/// Bounded origin to mirror record for one relay direction, evicted oldest first.
#[derive(Debug)]
pub struct MessageCache {
    origin_platform: Platform,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl MessageCache {
    pub fn new(origin_platform: Platform, capacity: usize) -> Self {
        Self {
            origin_platform,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn mirror_platform(&self) -> Platform {
        self.origin_platform.opposite()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().by_origin.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `origin_id` as in flight. Returns false when it is already relayed or being relayed.
    pub fn claim(&self, origin_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.by_origin.contains_key(origin_id) {
            return false;
        }
        state.pending.insert(origin_id.to_string())
    }

    pub fn release(&self, origin_id: &str) {
        self.state.lock().pending.remove(origin_id);
    }

    /// Records a confirmed mirror, returning the entry evicted to make room, if any.
    pub fn record(
        &self,
        origin: MessageRef,
        mirror: MessageRef,
        route: MirrorRoute,
        framing: MirrorFraming,
    ) -> Option<CachedMessage> {
        let mut state = self.state.lock();
        state.pending.remove(&origin.message_id);
        state.remove(&origin.message_id);

        let seq = state.next_seq;
        state.next_seq += 1;
        let origin_id = origin.message_id.clone();
        state
            .by_mirror
            .insert(mirror.message_id.clone(), origin_id.clone());
        state.order.push_back((seq, origin_id.clone()));
        state.by_origin.insert(
            origin_id,
            CacheSlot {
                seq,
                entry: CachedMessage {
                    origin,
                    mirror,
                    route,
                    framing,
                    created_at: Utc::now(),
                },
            },
        );

        let evicted = if state.by_origin.len() > self.capacity {
            state.evict_oldest()
        } else {
            None
        };

        // forgotten entries leave stale order slots behind
        if state.order.len() > self.capacity * 2 {
            let CacheState {
                order, by_origin, ..
            } = &mut *state;
            order.retain(|(seq, id)| by_origin.get(id).is_some_and(|slot| slot.seq == *seq));
        }

        evicted
    }

    pub fn find_mirror(&self, platform: Platform, origin_id: &str) -> Option<CachedMessage> {
        if platform != self.origin_platform {
            return None;
        }
        self.state
            .lock()
            .by_origin
            .get(origin_id)
            .map(|slot| slot.entry.clone())
    }

    pub fn find_origin(&self, platform: Platform, mirror_id: &str) -> Option<CachedMessage> {
        if platform != self.mirror_platform() {
            return None;
        }
        let state = self.state.lock();
        state
            .by_mirror
            .get(mirror_id)
            .and_then(|origin_id| state.by_origin.get(origin_id))
            .map(|slot| slot.entry.clone())
    }

    pub fn is_mirror_of(&self, platform: Platform, message_id: &str) -> bool {
        platform == self.mirror_platform() && self.state.lock().by_mirror.contains_key(message_id)
    }

    pub fn forget(&self, origin_id: &str) -> Option<CachedMessage> {
        self.state.lock().remove(origin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageCache, MirrorFraming, MirrorRoute};
    use crate::platform::{MessageRef, Platform};

    fn record(cache: &MessageCache, origin: &str, mirror: &str) {
        cache.record(
            MessageRef::new(Platform::Discord, "D1", origin),
            MessageRef::new(Platform::Revolt, "R1", mirror),
            MirrorRoute::Direct,
            MirrorFraming::default(),
        );
    }

    #[test]
    fn lookups_work_by_origin_and_by_mirror() {
        let cache = MessageCache::new(Platform::Discord, 10);
        record(&cache, "d-1", "r-1");

        let entry = cache
            .find_mirror(Platform::Discord, "d-1")
            .expect("mirror recorded");
        assert_eq!(entry.mirror.message_id, "r-1");
        assert!(cache.is_mirror_of(Platform::Revolt, "r-1"));
        assert!(!cache.is_mirror_of(Platform::Discord, "r-1"));
        assert_eq!(
            cache
                .find_origin(Platform::Revolt, "r-1")
                .map(|entry| entry.origin.message_id),
            Some("d-1".to_string())
        );
        assert!(cache.find_mirror(Platform::Revolt, "d-1").is_none());
    }

    #[test]
    fn inserting_past_capacity_evicts_exactly_the_oldest() {
        let cache = MessageCache::new(Platform::Discord, 3);
        for n in 0..3 {
            record(&cache, &format!("d-{n}"), &format!("r-{n}"));
        }
        let evicted = cache.record(
            MessageRef::new(Platform::Discord, "D1", "d-3"),
            MessageRef::new(Platform::Revolt, "R1", "r-3"),
            MirrorRoute::Direct,
            MirrorFraming::default(),
        );

        assert_eq!(
            evicted.map(|entry| entry.origin.message_id),
            Some("d-0".to_string())
        );
        assert_eq!(cache.len(), 3);
        assert!(cache.find_mirror(Platform::Discord, "d-0").is_none());
        assert!(!cache.is_mirror_of(Platform::Revolt, "r-0"));
        for n in 1..4 {
            assert!(cache.find_mirror(Platform::Discord, &format!("d-{n}")).is_some());
        }
    }

    #[test]
    fn forgotten_entries_do_not_count_toward_eviction() {
        let cache = MessageCache::new(Platform::Discord, 2);
        record(&cache, "d-0", "r-0");
        record(&cache, "d-1", "r-1");
        cache.forget("d-0").expect("forget existing");
        record(&cache, "d-2", "r-2");

        assert_eq!(cache.len(), 2);
        assert!(cache.find_mirror(Platform::Discord, "d-1").is_some());
        assert!(cache.find_mirror(Platform::Discord, "d-2").is_some());
    }

    #[test]
    fn claim_blocks_duplicates_until_released_or_recorded() {
        let cache = MessageCache::new(Platform::Discord, 10);
        assert!(cache.claim("d-1"));
        assert!(!cache.claim("d-1"));
        cache.release("d-1");
        assert!(cache.claim("d-1"));

        record(&cache, "d-1", "r-1");
        assert!(!cache.claim("d-1"));
    }

    #[test]
    fn stale_order_slots_are_compacted() {
        let cache = MessageCache::new(Platform::Discord, 2);
        for n in 0..20 {
            let id = format!("d-{n}");
            record(&cache, &id, &format!("r-{n}"));
            cache.forget(&id);
        }
        assert!(cache.is_empty());
        assert!(cache.state.lock().order.len() <= 4);
    }
}
