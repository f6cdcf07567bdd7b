use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::platform::{EventReceiver, Platform, PlatformEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    Command,
}

impl EventKind {
    pub fn of(event: &PlatformEvent) -> Self {
        match event {
            PlatformEvent::Ready { .. } => EventKind::Ready,
            PlatformEvent::MessageCreate(_) => EventKind::MessageCreate,
            PlatformEvent::MessageUpdate(_) => EventKind::MessageUpdate,
            PlatformEvent::MessageDelete(_) => EventKind::MessageDelete,
            PlatformEvent::Command(_) => EventKind::Command,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::MessageCreate => "message_create",
            EventKind::MessageUpdate => "message_update",
            EventKind::MessageDelete => "message_delete",
            EventKind::Command => "command",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PlatformEvent) -> anyhow::Result<()>;
}

/// Routes platform events to the handlers subscribed to their kind, in subscription order.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    #[cfg(test)]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub async fn dispatch(&self, event: &PlatformEvent) {
        let kind = EventKind::of(event);
        let Some(handlers) = self.handlers.get(&kind) else {
            debug!("{} event without subscribers kind={}", event.platform(), kind.as_str());
            return;
        };
        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                error!(
                    "{} event handler failed kind={} error={:#}",
                    event.platform(),
                    kind.as_str(),
                    err
                );
            }
        }
    }

    /// Handles one platform's events in order until every sender is dropped or `shutdown`
    /// flips. An event already being dispatched runs to completion; queued ones are discarded.
    pub fn spawn_queue(
        self: Arc<Self>,
        platform: Platform,
        mut events: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("{} event queue started", platform);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!("{} event queue stopping, pending={}", platform, events.len());
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => self.dispatch(&event).await,
                        None => break,
                    },
                }
            }
            info!("{} event queue closed", platform);
        })
    }
}
