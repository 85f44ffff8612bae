//! Application state management

use adbridge_core::{
    Authenticator, CredentialProvider, DeviceDiscovery, DeviceSummary, PresenceBroadcaster,
    SessionRegistry,
};
use adbridge_loopback::{LoopbackAuthenticator, LoopbackDiscovery};
use anyhow::Result;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credential::FileCredentialStore;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Device discovery backend
    pub discovery: Arc<dyn DeviceDiscovery>,
    /// Authenticated device sessions
    pub registry: SessionRegistry,
    /// Device list fan-out for `/devices` observers
    pub presence: PresenceBroadcaster,
}

impl AppState {
    /// Create application state backed by the configured loopback devices
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        if config.loopback_devices.is_empty() {
            warn!("No devices configured; the device list will stay empty");
        }
        let discovery = Arc::new(LoopbackDiscovery::new(config.loopback_devices.clone()));
        let credentials = Arc::new(FileCredentialStore::new(
            config.credentials.resolved_key_path(),
        ));

        Self::with_backend(
            config,
            discovery,
            Arc::new(LoopbackAuthenticator::new()),
            credentials,
        )
        .await
    }

    /// Create application state over an arbitrary device backend
    pub async fn with_backend(
        config: Config,
        discovery: Arc<dyn DeviceDiscovery>,
        authenticator: Arc<dyn Authenticator>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Arc<Self>> {
        // Subscribe before listing so no change falls in between
        let rx = discovery.watch();
        let devices = discovery.list().await?;
        info!(devices = devices.len(), "Initial device list");

        let state = Arc::new(Self {
            config,
            registry: SessionRegistry::new(discovery.clone(), authenticator, credentials),
            presence: PresenceBroadcaster::new(devices),
            discovery,
        });

        spawn_presence_forwarder(Arc::downgrade(&state), rx);
        Ok(state)
    }

    /// Publish a new device list and drop sessions of departed devices
    pub async fn apply_device_list(&self, devices: Vec<DeviceSummary>) {
        for serial in self.presence.publish(devices).await {
            if self.registry.invalidate(&serial).await {
                info!(serial = %serial, "Device detached, session dropped");
            }
        }
    }
}

/// Forward discovery notifications until the discovery source or the state goes away
fn spawn_presence_forwarder(
    state: Weak<AppState>,
    mut rx: broadcast::Receiver<Vec<DeviceSummary>>,
) {
    tokio::spawn(async move {
        loop {
            let update = rx.recv().await;
            let Some(state) = state.upgrade() else {
                break;
            };

            let devices = match update {
                Ok(devices) => devices,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Discovery notifications lagged, re-listing");
                    match state.discovery.list().await {
                        Ok(devices) => devices,
                        Err(e) => {
                            warn!(error = %e, "Failed to re-list devices");
                            continue;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            };

            state.apply_device_list(devices).await;
        }
        debug!("Presence forwarder stopped");
    });
}
