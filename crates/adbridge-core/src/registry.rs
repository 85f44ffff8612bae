//! Session registry: serial -> authenticated device transport
//!
//! A session is established lazily by the first request that needs it and
//! reused afterwards. Concurrent requests for the same serial share one
//! handshake: the pending handshake lives in the map as a shared future, so
//! "check, then insert" happens under a single lock acquisition and never
//! spans the handshake itself.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::{Banner, DeviceId};
use crate::error::{BridgeError, Result};
use crate::transport::{Authenticator, CredentialProvider, DeviceDiscovery, DeviceTransport};

/// An established, authenticated connection to one device
pub struct Session {
    pub identity: DeviceId,
    pub transport: Arc<dyn DeviceTransport>,
    pub max_payload_size: u32,
    pub banner: Banner,
}

impl Session {
    pub fn new(identity: DeviceId, transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            max_payload_size: transport.max_payload_size(),
            banner: transport.banner().clone(),
            identity,
            transport,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("max_payload_size", &self.max_payload_size)
            .field("banner", &self.banner)
            .finish()
    }
}

type Handshake = Shared<BoxFuture<'static, Result<Arc<Session>>>>;

enum Slot {
    Ready(Arc<Session>),
    Pending { epoch: u64, handshake: Handshake },
}

/// Owns every session; the single source of truth for "is this device bridgeable"
pub struct SessionRegistry {
    discovery: Arc<dyn DeviceDiscovery>,
    authenticator: Arc<dyn Authenticator>,
    credentials: Arc<dyn CredentialProvider>,
    sessions: Mutex<HashMap<DeviceId, Slot>>,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        authenticator: Arc<dyn Authenticator>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            discovery,
            authenticator,
            credentials,
            sessions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Return the session for `identity`, establishing it if needed
    ///
    /// Fails with [`BridgeError::DeviceNotFound`] when no attached device has
    /// this serial, or [`BridgeError::AuthenticationFailed`] when the
    /// handshake is rejected. Failures are not retried here; a failed attempt
    /// leaves no trace, so the next request starts over.
    pub async fn get_or_create(&self, identity: &DeviceId) -> Result<Arc<Session>> {
        let (epoch, handshake) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(identity) {
                Some(Slot::Ready(session)) => return Ok(session.clone()),
                Some(Slot::Pending { epoch, handshake }) => {
                    debug!(serial = %identity, "Joining pending handshake");
                    (*epoch, handshake.clone())
                }
                None => {
                    let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                    let handshake = establish(
                        self.discovery.clone(),
                        self.authenticator.clone(),
                        self.credentials.clone(),
                        identity.clone(),
                    )
                    .boxed()
                    .shared();
                    sessions.insert(
                        identity.clone(),
                        Slot::Pending {
                            epoch,
                            handshake: handshake.clone(),
                        },
                    );
                    (epoch, handshake)
                }
            }
        };

        let result = handshake.await;

        if self.settle(identity, epoch, &result).await {
            return result;
        }

        // Invalidated while the handshake was in flight
        if let Ok(session) = result {
            session.transport.close().await;
        }
        Err(BridgeError::DeviceNotFound(identity.clone()))
    }

    /// Non-creating lookup; never triggers a handshake
    pub async fn get(&self, identity: &DeviceId) -> Option<Arc<Session>> {
        match self.sessions.lock().await.get(identity) {
            Some(Slot::Ready(session)) => Some(session.clone()),
            _ => None,
        }
    }

    pub async fn contains(&self, identity: &DeviceId) -> bool {
        self.get(identity).await.is_some()
    }

    /// Number of established sessions
    pub async fn len(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop the session for `identity`, closing its transport
    ///
    /// Returns true if anything (ready or pending) was removed.
    pub async fn invalidate(&self, identity: &DeviceId) -> bool {
        let removed = self.sessions.lock().await.remove(identity);
        match removed {
            Some(Slot::Ready(session)) => {
                info!(serial = %identity, "Session invalidated");
                session.transport.close().await;
                true
            }
            Some(Slot::Pending { .. }) => {
                info!(serial = %identity, "Pending handshake invalidated");
                true
            }
            None => false,
        }
    }

    /// Record the outcome of handshake `epoch`. Returns false if the slot was
    /// invalidated (or replaced) while the handshake ran.
    async fn settle(&self, identity: &DeviceId, epoch: u64, result: &Result<Arc<Session>>) -> bool {
        let mut sessions = self.sessions.lock().await;
        let current = match (sessions.get(identity), result) {
            (Some(Slot::Pending { epoch: pending, .. }), _) => *pending == epoch,
            (Some(Slot::Ready(ready)), Ok(session)) => Arc::ptr_eq(ready, session),
            _ => false,
        };
        if !current {
            return result.is_err() && !sessions.contains_key(identity);
        }

        match result {
            Ok(session) => {
                if !matches!(sessions.get(identity), Some(Slot::Ready(_))) {
                    info!(
                        serial = %identity,
                        max_payload_size = session.max_payload_size,
                        model = ?session.banner.model,
                        "Session established"
                    );
                    sessions.insert(identity.clone(), Slot::Ready(session.clone()));
                }
            }
            Err(e) => {
                warn!(serial = %identity, error = %e, "Session establishment failed");
                sessions.remove(identity);
            }
        }
        true
    }
}

async fn establish(
    discovery: Arc<dyn DeviceDiscovery>,
    authenticator: Arc<dyn Authenticator>,
    credentials: Arc<dyn CredentialProvider>,
    identity: DeviceId,
) -> Result<Arc<Session>> {
    let device = discovery
        .find(&identity)
        .await?
        .ok_or_else(|| BridgeError::DeviceNotFound(identity.clone()))?;

    debug!(serial = %identity, "Opening device connection");
    let connection = device.connect().await?;

    // However the handshake breaks down, the caller sees an auth failure
    let transport = authenticator
        .authenticate(&identity, connection, credentials.as_ref())
        .await
        .map_err(|e| match e {
            BridgeError::AuthenticationFailed { .. } => e,
            other => BridgeError::AuthenticationFailed {
                identity: identity.clone(),
                reason: other.to_string(),
            },
        })?;

    Ok(Arc::new(Session::new(identity, transport)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuthenticator, FakeDiscovery, NoCredentials};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn registry(discovery: Arc<FakeDiscovery>, auth: Arc<FakeAuthenticator>) -> SessionRegistry {
        SessionRegistry::new(discovery, auth, Arc::new(NoCredentials))
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_handshake() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new().with_delay(Duration::from_millis(50)));
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        let (a, b) = tokio::join!(registry.get_or_create(&id), registry.get_or_create(&id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.max_payload_size, b.max_payload_size);
        assert_eq!(a.banner, b.banner);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_existing_session_is_reused() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new());
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        let first = registry.get_or_create(&id).await.unwrap();
        let second = registry.get_or_create(&id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(first.max_payload_size, 256 * 1024);
        assert_eq!(first.banner.model.as_deref(), Some("Fake"));
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["ABC"]));
        let auth = Arc::new(FakeAuthenticator::new());
        let registry = registry(discovery, auth.clone());

        let err = registry.get_or_create(&DeviceId::new("XYZ")).await.unwrap_err();
        assert_eq!(err, BridgeError::DeviceNotFound(DeviceId::new("XYZ")));
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_shared_and_not_retained() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(
            FakeAuthenticator::new()
                .rejecting()
                .with_delay(Duration::from_millis(20)),
        );
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        let (a, b) = tokio::join!(registry.get_or_create(&id), registry.get_or_create(&id));
        assert!(matches!(a, Err(BridgeError::AuthenticationFailed { .. })));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 1);

        // Nothing cached: the next request performs a new handshake
        assert!(registry.get(&id).await.is_none());
        let _ = registry.get_or_create(&id).await;
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_broken_handshake_reported_as_auth_failure() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new().failing_with(
            BridgeError::ProtocolViolation("read with no reply pending".to_string()),
        ));
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        match registry.get_or_create(&id).await {
            Err(BridgeError::AuthenticationFailed { identity, reason }) => {
                assert_eq!(identity, id);
                assert!(reason.contains("read with no reply pending"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_never_creates() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new());
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        assert!(registry.get(&id).await.is_none());
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 0);

        registry.get_or_create(&id).await.unwrap();
        assert!(registry.contains(&id).await);
    }

    #[tokio::test]
    async fn test_invalidate_closes_transport() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new());
        let registry = registry(discovery, auth.clone());
        let id = DeviceId::new("XYZ");

        registry.get_or_create(&id).await.unwrap();
        assert!(registry.invalidate(&id).await);
        assert!(!registry.invalidate(&id).await);
        assert!(registry.get(&id).await.is_none());
        assert_eq!(auth.closed.load(Ordering::SeqCst), 1);

        // A later request authenticates again
        registry.get_or_create(&id).await.unwrap();
        assert_eq!(auth.handshakes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_handshake() {
        let discovery = Arc::new(FakeDiscovery::with_devices(&["XYZ"]));
        let auth = Arc::new(FakeAuthenticator::new().with_delay(Duration::from_millis(50)));
        let registry = Arc::new(registry(discovery, auth.clone()));
        let id = DeviceId::new("XYZ");

        let pending = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.get_or_create(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.invalidate(&id).await);

        let result = pending.await.unwrap();
        assert_eq!(result.unwrap_err(), BridgeError::DeviceNotFound(id.clone()));
        assert!(registry.get(&id).await.is_none());
        assert_eq!(auth.closed.load(Ordering::SeqCst), 1);
    }
}
