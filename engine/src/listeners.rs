//! Tab-event capture: the host bridge and the listener registry.
//!
//! The host side of the bridge is a clonable sender; the engine side is a
//! receiver the registry consumes exactly once when the hooks attach. Every
//! event is persisted (best effort) and folded into the aggregator by a
//! single dispatch task, so ordering is the host's ordering.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};

use vigil_store::EventStore;
use vigil_types::TabEvent;

use crate::aggregator::UsageAggregator;
use crate::subsystems::Listeners;

/// The host's half of the event bridge.
///
/// Stands in for the browser's tab hooks: whatever feeds this sender plays
/// the host runtime.
#[derive(Debug, Clone)]
pub struct HostBridge {
    tx: mpsc::UnboundedSender<TabEvent>,
}

impl HostBridge {
    /// Deliver one event to the engine.
    ///
    /// Returns false when the engine side is gone (dispatch task dead or
    /// never registered and registry dropped).
    pub fn emit(&self, event: TabEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Attaches the engine to the host's tab events.
#[derive(Debug)]
pub struct TabListenerRegistry {
    store: Arc<EventStore>,
    aggregator: Arc<UsageAggregator>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TabEvent>>>,
}

impl TabListenerRegistry {
    /// Build the registry and the host's half of the bridge.
    #[must_use]
    pub fn new(store: Arc<EventStore>, aggregator: Arc<UsageAggregator>) -> (Self, HostBridge) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            store,
            aggregator,
            events: Mutex::new(Some(rx)),
        };
        (registry, HostBridge { tx })
    }

    /// Consume the bridge receiver and spawn the dispatch task.
    ///
    /// Hooks attach once per process: a second call is an error.
    async fn attach(&self) -> Result<()> {
        let mut guard = self.events.lock().await;
        let Some(mut rx) = guard.take() else {
            anyhow::bail!("tab listeners already registered");
        };
        drop(guard);

        let store = Arc::clone(&self.store);
        let aggregator = Arc::clone(&self.aggregator);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = store.record_event(&event).await {
                    tracing::warn!("failed to persist tab event: {err:#}");
                }
                aggregator.handle_event(&event).await;
            }
            tracing::debug!("host bridge closed; tab listener task exiting");
        });
        Ok(())
    }
}

impl Listeners for TabListenerRegistry {
    async fn register_tab_listeners(&self) -> Result<()> {
        self.attach().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_types::TabId;

    const T0: u64 = 1_700_000_000;

    async fn wired() -> (
        Arc<EventStore>,
        Arc<UsageAggregator>,
        TabListenerRegistry,
        HostBridge,
    ) {
        let store = Arc::new(EventStore::in_memory());
        store.initialize().await.unwrap();
        let aggregator = Arc::new(UsageAggregator::new(Arc::clone(&store)));
        aggregator.initialize().await.unwrap();
        let (registry, bridge) =
            TabListenerRegistry::new(Arc::clone(&store), Arc::clone(&aggregator));
        (store, aggregator, registry, bridge)
    }

    #[tokio::test]
    async fn events_flow_to_store_and_aggregator() {
        let (store, _aggregator, registry, bridge) = wired().await;
        registry.register_tab_listeners().await.unwrap();

        assert!(bridge.emit(TabEvent::Created {
            tab: TabId::new(1),
            url: "https://example.com".to_string(),
            at: T0,
        }));
        assert!(bridge.emit(TabEvent::Activated {
            tab: TabId::new(1),
            at: T0,
        }));
        assert!(bridge.emit(TabEvent::Removed {
            tab: TabId::new(1),
            at: T0 + 25,
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = store.events_since(0).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            store
                .usage_for_day(vigil_types::DayStamp::from_unix(T0))
                .await
                .unwrap()[0]
                .seconds,
            25
        );
    }

    #[tokio::test]
    async fn second_registration_is_rejected() {
        let (_store, _aggregator, registry, _bridge) = wired().await;

        registry.register_tab_listeners().await.unwrap();
        let err = registry.register_tab_listeners().await.unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn dispatch_survives_an_unready_store() {
        let store = Arc::new(EventStore::in_memory());
        // Storage never came up; dispatch must still run.
        let aggregator = Arc::new(UsageAggregator::new(Arc::clone(&store)));
        aggregator.initialize().await.unwrap();
        let (registry, bridge) =
            TabListenerRegistry::new(Arc::clone(&store), Arc::clone(&aggregator));
        registry.register_tab_listeners().await.unwrap();

        assert!(bridge.emit(TabEvent::Created {
            tab: TabId::new(1),
            url: "https://example.com".to_string(),
            at: T0,
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Still alive: the sender finds a living receiver task.
        assert!(bridge.emit(TabEvent::Activated {
            tab: TabId::new(1),
            at: T0,
        }));
    }
}
