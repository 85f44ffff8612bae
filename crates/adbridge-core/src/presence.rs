//! Device presence fan-out
//!
//! Every observer owns a latest-value slot. Publishing overwrites the slot,
//! so a slow observer skips stale snapshots instead of holding up the
//! producer or anyone else.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::device::{DeviceId, DeviceSummary, PresenceEntry};

/// Handle identifying one subscribed observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A live subscription. `updates` always holds the newest serialized list.
pub struct Subscription {
    pub id: ObserverId,
    pub updates: watch::Receiver<Arc<str>>,
}

struct Inner {
    devices: Vec<DeviceSummary>,
    snapshot: Arc<str>,
    observers: HashMap<ObserverId, watch::Sender<Arc<str>>>,
    next_id: u64,
}

pub struct PresenceBroadcaster {
    inner: RwLock<Inner>,
}

impl PresenceBroadcaster {
    pub fn new(devices: Vec<DeviceSummary>) -> Self {
        let snapshot = serialize(&devices).unwrap_or_else(|| Arc::from("[]"));
        Self {
            inner: RwLock::new(Inner {
                devices,
                snapshot,
                observers: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register an observer; its slot starts out holding the current list
    pub async fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.write().await;
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;

        let (tx, rx) = watch::channel(inner.snapshot.clone());
        inner.observers.insert(id, tx);
        debug!(observer = id.0, total = inner.observers.len(), "Presence observer subscribed");

        Subscription { id, updates: rx }
    }

    /// Remove an observer. Idempotent.
    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.inner.write().await.observers.remove(&id).is_some();
        if removed {
            debug!(observer = id.0, "Presence observer unsubscribed");
        }
        removed
    }

    /// Replace the device list and deliver it to every observer
    ///
    /// Returns the serials that were present before and are gone now.
    pub async fn publish(&self, devices: Vec<DeviceSummary>) -> Vec<DeviceId> {
        let mut inner = self.inner.write().await;

        let still_present: HashSet<&DeviceId> = devices.iter().map(|d| &d.id).collect();
        let departed: Vec<DeviceId> = inner
            .devices
            .iter()
            .filter(|d| !still_present.contains(&d.id))
            .map(|d| d.id.clone())
            .collect();

        let Some(snapshot) = serialize(&devices) else {
            return departed;
        };
        inner.snapshot = snapshot.clone();
        inner.devices = devices;

        // A failed send means the receiving side is gone
        inner.observers.retain(|id, tx| {
            let delivered = tx.send(snapshot.clone()).is_ok();
            if !delivered {
                debug!(observer = id.0, "Dropping closed presence observer");
            }
            delivered
        });

        debug!(
            devices = inner.devices.len(),
            observers = inner.observers.len(),
            departed = departed.len(),
            "Published device list"
        );
        departed
    }

    pub async fn devices(&self) -> Vec<DeviceSummary> {
        self.inner.read().await.devices.clone()
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.read().await.observers.len()
    }
}

fn serialize(devices: &[DeviceSummary]) -> Option<Arc<str>> {
    let entries: Vec<PresenceEntry<'_>> = devices.iter().map(PresenceEntry::from).collect();
    match serde_json::to_string(&entries) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize device list");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::summary;

    #[tokio::test]
    async fn test_subscribe_receives_current_snapshot() {
        let presence = PresenceBroadcaster::new(vec![summary("A")]);
        let mut sub = presence.subscribe().await;

        let first = sub.updates.borrow_and_update().clone();
        let parsed: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                { "serial": "A", "name": "A name", "vendorId": 6353, "productId": 20199 }
            ])
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_every_observer() {
        let presence = PresenceBroadcaster::new(Vec::new());
        let mut a = presence.subscribe().await;
        let mut b = presence.subscribe().await;

        presence.publish(vec![summary("A"), summary("B")]).await;

        a.updates.changed().await.unwrap();
        b.updates.changed().await.unwrap();
        assert_eq!(*a.updates.borrow(), *b.updates.borrow());
        assert!(a.updates.borrow().contains("\"serial\":\"B\""));
    }

    #[tokio::test]
    async fn test_stalled_observer_does_not_block_others() {
        let presence = PresenceBroadcaster::new(Vec::new());
        // Never reads
        let _stalled = presence.subscribe().await;
        let mut healthy = presence.subscribe().await;

        for n in 0..100 {
            let serial = format!("D{}", n);
            presence.publish(vec![summary(&serial)]).await;
            healthy.updates.changed().await.unwrap();
            assert!(healthy.updates.borrow_and_update().contains(&serial));
        }
        assert_eq!(presence.observer_count().await, 2);
    }

    #[tokio::test]
    async fn test_closed_observer_is_dropped_on_publish() {
        let presence = PresenceBroadcaster::new(Vec::new());
        let gone = presence.subscribe().await;
        let _kept = presence.subscribe().await;
        drop(gone.updates);

        presence.publish(vec![summary("A")]).await;
        assert_eq!(presence.observer_count().await, 1);

        // Already dropped: explicit unsubscribe is a no-op
        assert!(!presence.unsubscribe(gone.id).await);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let presence = PresenceBroadcaster::new(Vec::new());
        let sub = presence.subscribe().await;
        assert!(presence.unsubscribe(sub.id).await);
        assert!(!presence.unsubscribe(sub.id).await);
        assert_eq!(presence.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_reports_departures() {
        let presence = PresenceBroadcaster::new(vec![summary("A"), summary("B")]);
        let departed = presence.publish(vec![summary("B"), summary("C")]).await;
        assert_eq!(departed, vec![DeviceId::new("A")]);
        assert_eq!(presence.devices().await.len(), 2);
    }
}
