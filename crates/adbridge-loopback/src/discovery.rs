//! Discovery over the in-memory device table

use adbridge_core::{DeviceConnection, DeviceDiscovery, DeviceId, DeviceSummary, RawDevice, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::connection::LoopbackConnection;
use crate::profile::LoopbackProfile;

/// Loopback discovery service
///
/// Devices come and go through [`attach`](Self::attach) and
/// [`detach`](Self::detach); each change publishes the full new list.
pub struct LoopbackDiscovery {
    devices: RwLock<BTreeMap<DeviceId, LoopbackProfile>>,
    event_tx: broadcast::Sender<Vec<DeviceSummary>>,
}

impl LoopbackDiscovery {
    pub fn new(profiles: Vec<LoopbackProfile>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let devices = profiles.into_iter().map(|p| (p.id(), p)).collect();
        Self {
            devices: RwLock::new(devices),
            event_tx,
        }
    }

    /// Plug a device in (replaces a device with the same serial)
    pub async fn attach(&self, profile: LoopbackProfile) {
        let mut devices = self.devices.write().await;
        info!(serial = %profile.serial, "Loopback device attached");
        devices.insert(profile.id(), profile);
        let _ = self.event_tx.send(summaries(&devices));
    }

    /// Unplug a device, returns true if it was attached
    pub async fn detach(&self, id: &DeviceId) -> bool {
        let mut devices = self.devices.write().await;
        if devices.remove(id).is_some() {
            info!(serial = %id, "Loopback device detached");
            let _ = self.event_tx.send(summaries(&devices));
            true
        } else {
            false
        }
    }
}

fn summaries(devices: &BTreeMap<DeviceId, LoopbackProfile>) -> Vec<DeviceSummary> {
    devices.values().map(LoopbackProfile::summary).collect()
}

#[async_trait]
impl DeviceDiscovery for LoopbackDiscovery {
    async fn list(&self) -> Result<Vec<DeviceSummary>> {
        Ok(summaries(&*self.devices.read().await))
    }

    fn watch(&self) -> broadcast::Receiver<Vec<DeviceSummary>> {
        self.event_tx.subscribe()
    }

    async fn find(&self, identity: &DeviceId) -> Result<Option<Box<dyn RawDevice>>> {
        Ok(self
            .devices
            .read()
            .await
            .get(identity)
            .cloned()
            .map(|profile| {
                Box::new(LoopbackRawDevice {
                    id: profile.id(),
                    profile,
                }) as Box<dyn RawDevice>
            }))
    }
}

struct LoopbackRawDevice {
    id: DeviceId,
    profile: LoopbackProfile,
}

#[async_trait]
impl RawDevice for LoopbackRawDevice {
    fn identity(&self) -> &DeviceId {
        &self.id
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn DeviceConnection>> {
        Ok(Box::new(LoopbackConnection::new(self.profile)))
    }
}
