use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::error::RelayError;
use crate::platform::{Masquerade, OutboundMessage, Platform, WebhookApi, WebhookHandle};
use crate::utils::retry::with_retry;

type WebhookSlot = Arc<OnceCell<Arc<WebhookHandle>>>;

/// One Discord webhook per mapped channel, created on first use.
pub struct WebhookProvisioner {
    api: Arc<dyn WebhookApi>,
    timeout: Duration,
    slots: Mutex<HashMap<String, WebhookSlot>>,
    owned_ids: RwLock<HashSet<String>>,
}

impl WebhookProvisioner {
    pub fn new(api: Arc<dyn WebhookApi>, timeout: Duration) -> Self {
        Self {
            api,
            timeout,
            slots: Mutex::new(HashMap::new()),
            owned_ids: RwLock::new(HashSet::new()),
        }
    }

    /// Concurrent callers for the same channel wait on a single creation.
    pub async fn get_or_create(&self, channel_id: &str) -> Result<Arc<WebhookHandle>, RelayError> {
        let slot = self
            .slots
            .lock()
            .entry(channel_id.to_string())
            .or_default()
            .clone();

        let handle = slot
            .get_or_try_init(|| async {
                let handle = with_retry("create webhook", self.timeout, || {
                    self.api.create_webhook(channel_id)
                })
                .await
                .map_err(|err| RelayError::client("create webhook", Platform::Discord, err))?;
                info!(
                    "webhook ready channel_id={} webhook_id={}",
                    channel_id, handle.endpoint_id
                );
                Ok::<_, RelayError>(Arc::new(handle))
            })
            .await?
            .clone();

        self.owned_ids.write().insert(handle.endpoint_id.clone());
        Ok(handle)
    }

    #[cfg(test)]
    pub fn cached(&self, channel_id: &str) -> Option<Arc<WebhookHandle>> {
        self.slots
            .lock()
            .get(channel_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Drops the cached handle for the channel if it is still `stale`.
    pub fn invalidate(&self, stale: &WebhookHandle) {
        let mut slots = self.slots.lock();
        let current = slots
            .get(&stale.channel_id)
            .and_then(|slot| slot.get())
            .map(|handle| handle.endpoint_id == stale.endpoint_id);
        if current.unwrap_or(false) {
            slots.remove(&stale.channel_id);
            warn!(
                "webhook invalidated channel_id={} webhook_id={}",
                stale.channel_id, stale.endpoint_id
            );
        }
    }

    pub fn owns_webhook(&self, webhook_id: &str) -> bool {
        self.owned_ids.read().contains(webhook_id)
    }

    pub async fn send(
        &self,
        handle: &Arc<WebhookHandle>,
        author_name: &str,
        author_avatar_url: Option<&str>,
        message: &OutboundMessage,
    ) -> Result<String, RelayError> {
        let mut message = message.clone();
        message.masquerade = Some(Masquerade {
            name: author_name.to_string(),
            avatar_url: author_avatar_url.map(str::to_string),
        });

        with_retry("execute webhook", self.timeout, || {
            self.api.execute_webhook(handle, &message)
        })
        .await
        .map_err(|err| {
            // only a send can tell a vanished webhook apart from a vanished message
            if err.is_not_found() {
                self.invalidate(handle);
            }
            RelayError::client("execute webhook", Platform::Discord, err)
        })
    }

    pub async fn edit(
        &self,
        handle: &Arc<WebhookHandle>,
        message_id: &str,
        content: &str,
    ) -> Result<(), RelayError> {
        with_retry("edit webhook message", self.timeout, || {
            self.api.edit_webhook_message(handle, message_id, content)
        })
        .await
        .map_err(|err| RelayError::client("edit webhook message", Platform::Discord, err))
    }

    pub async fn delete(
        &self,
        handle: &Arc<WebhookHandle>,
        message_id: &str,
    ) -> Result<(), RelayError> {
        with_retry("delete webhook message", self.timeout, || {
            self.api.delete_webhook_message(handle, message_id)
        })
        .await
        .map_err(|err| RelayError::client("delete webhook message", Platform::Discord, err))
    }

    /// Provisions every channel up front. Failures are logged and retried lazily on first send.
    pub async fn warm<I>(&self, channel_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut ready = 0usize;
        for channel_id in channel_ids {
            match self.get_or_create(&channel_id).await {
                Ok(_) => ready += 1,
                Err(err) => warn!("webhook warm-up failed channel_id={channel_id}: {err}"),
            }
        }
        debug!("webhook warm-up finished ready={ready}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use futures::future::join_all;

    use super::WebhookProvisioner;
    use crate::platform::testing::FakeClient;
    use crate::platform::{ClientError, OutboundMessage, Platform};

    fn provisioner(client: &Arc<FakeClient>) -> WebhookProvisioner {
        WebhookProvisioner::new(client.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn concurrent_get_or_create_creates_one_webhook() {
        let client =
            Arc::new(FakeClient::new(Platform::Discord).with_webhook_delay(Duration::from_millis(20)));
        let provisioner = provisioner(&client);

        let handles = join_all((0..10).map(|_| provisioner.get_or_create("D1"))).await;

        assert_eq!(client.webhooks_created.load(Ordering::SeqCst), 1);
        let ids: Vec<String> = handles
            .into_iter()
            .map(|handle| handle.expect("webhook").endpoint_id.clone())
            .collect();
        assert!(ids.iter().all(|id| id == "wh-1"));
        assert!(provisioner.owns_webhook("wh-1"));
    }

    #[tokio::test]
    async fn different_channels_get_their_own_webhook() {
        let client = Arc::new(FakeClient::new(Platform::Discord));
        let provisioner = provisioner(&client);
        let first = provisioner.get_or_create("D1").await.expect("D1");
        let second = provisioner.get_or_create("D2").await.expect("D2");
        assert_ne!(first.endpoint_id, second.endpoint_id);
        assert_eq!(client.webhooks_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_invalidates_and_next_call_reprovisions() {
        let client = Arc::new(FakeClient::new(Platform::Discord));
        let provisioner = provisioner(&client);
        let handle = provisioner.get_or_create("D1").await.expect("webhook");

        client.fail_next(ClientError::NotFound("webhook".to_string()));
        let err = provisioner
            .send(&handle, "alice", None, &OutboundMessage::text("hi"))
            .await
            .expect_err("webhook gone");
        assert!(err.is_not_found());
        assert!(provisioner.cached("D1").is_none());

        let fresh = provisioner.get_or_create("D1").await.expect("recreated");
        assert_eq!(fresh.endpoint_id, "wh-2");
        assert!(provisioner.owns_webhook("wh-1"));
        assert!(provisioner.owns_webhook("wh-2"));
    }

    #[tokio::test]
    async fn missing_message_on_edit_or_delete_keeps_the_webhook() {
        let client = Arc::new(FakeClient::new(Platform::Discord));
        let provisioner = provisioner(&client);
        let handle = provisioner.get_or_create("D1").await.expect("webhook");

        client.fail_next(ClientError::NotFound("unknown message".to_string()));
        let err = provisioner
            .edit(&handle, "d-1", "changed")
            .await
            .expect_err("message gone");
        assert!(err.is_not_found());

        client.fail_next(ClientError::NotFound("unknown message".to_string()));
        let err = provisioner
            .delete(&handle, "d-1")
            .await
            .expect_err("message gone");
        assert!(err.is_not_found());

        let cached = provisioner.cached("D1").expect("still cached");
        assert_eq!(cached.endpoint_id, "wh-1");
        assert_eq!(client.webhooks_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_carries_author_identity() {
        let client = Arc::new(FakeClient::new(Platform::Discord));
        let provisioner = provisioner(&client);
        let handle = provisioner.get_or_create("D1").await.expect("webhook");

        provisioner
            .send(
                &handle,
                "alice",
                Some("https://cdn.example.org/a.png"),
                &OutboundMessage::text("hi"),
            )
            .await
            .expect("send");

        let sent = client.sent_messages();
        let masquerade = sent[0].message.masquerade.as_ref().expect("identity");
        assert_eq!(masquerade.name, "alice");
        assert_eq!(sent[0].webhook_id.as_deref(), Some("wh-1"));
    }

    #[tokio::test]
    async fn warm_provisions_every_channel() {
        let client = Arc::new(FakeClient::new(Platform::Discord));
        let provisioner = provisioner(&client);
        provisioner
            .warm(vec!["D1".to_string(), "D2".to_string(), "D1".to_string()])
            .await;
        assert_eq!(client.webhooks_created.load(Ordering::SeqCst), 2);
    }
}
