//! In-memory collaborators for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::device::{Banner, DeviceId, DeviceSummary};
use crate::error::{BridgeError, Result};
use crate::transport::{
    Authenticator, Channel, ChannelWriter, Credential, CredentialProvider, DeviceConnection,
    DeviceDiscovery, DeviceTransport, RawDevice,
};

pub struct FakeDiscovery {
    devices: Vec<DeviceSummary>,
    events: broadcast::Sender<Vec<DeviceSummary>>,
}

impl FakeDiscovery {
    pub fn with_devices(serials: &[&str]) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            devices: serials.iter().map(|s| summary(s)).collect(),
            events,
        }
    }
}

pub fn summary(serial: &str) -> DeviceSummary {
    DeviceSummary {
        id: DeviceId::new(serial),
        name: format!("{} name", serial),
        vendor_id: 0x18d1,
        product_id: 0x4ee7,
    }
}

#[async_trait]
impl DeviceDiscovery for FakeDiscovery {
    async fn list(&self) -> Result<Vec<DeviceSummary>> {
        Ok(self.devices.clone())
    }

    fn watch(&self) -> broadcast::Receiver<Vec<DeviceSummary>> {
        self.events.subscribe()
    }

    async fn find(&self, identity: &DeviceId) -> Result<Option<Box<dyn RawDevice>>> {
        Ok(self
            .devices
            .iter()
            .find(|d| &d.id == identity)
            .map(|d| Box::new(FakeRawDevice(d.id.clone())) as Box<dyn RawDevice>))
    }
}

struct FakeRawDevice(DeviceId);

#[async_trait]
impl RawDevice for FakeRawDevice {
    fn identity(&self) -> &DeviceId {
        &self.0
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn DeviceConnection>> {
        Ok(Box::new(FakeConnection))
    }
}

struct FakeConnection;

#[async_trait]
impl DeviceConnection for FakeConnection {
    async fn read_packet(&self) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn write_packet(&self, _packet: Bytes) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn credentials(&self) -> Result<Vec<Credential>> {
        Ok(Vec::new())
    }
}

/// Counts handshakes and transport closes
pub struct FakeAuthenticator {
    pub handshakes: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    delay: Option<Duration>,
    reject: bool,
    failure: Option<BridgeError>,
}

impl FakeAuthenticator {
    pub fn new() -> Self {
        Self {
            handshakes: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            delay: None,
            reject: false,
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    /// Handshake breaks down with `error` instead of completing
    pub fn failing_with(mut self, error: BridgeError) -> Self {
        self.failure = Some(error);
        self
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(
        &self,
        identity: &DeviceId,
        _connection: Box<dyn DeviceConnection>,
        _credentials: &dyn CredentialProvider,
    ) -> Result<Arc<dyn DeviceTransport>> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if self.reject {
            return Err(BridgeError::AuthenticationFailed {
                identity: identity.clone(),
                reason: "rejected".to_string(),
            });
        }
        Ok(Arc::new(FakeTransport {
            banner: Banner {
                product: Some("fake_product".to_string()),
                model: Some("Fake".to_string()),
                device: Some("fake".to_string()),
                features: vec!["shell_v2".to_string()],
            },
            closed: self.closed.clone(),
        }))
    }
}

struct FakeTransport {
    banner: Banner,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    fn max_payload_size(&self) -> u32 {
        256 * 1024
    }

    fn banner(&self) -> &Banner {
        &self.banner
    }

    async fn connect(&self, service: &str) -> Result<Channel> {
        Err(BridgeError::ChannelOpenRejected {
            service: service.to_string(),
            reason: "not supported".to_string(),
        })
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records what the bridge wrote into the device side
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub written: Arc<Mutex<Vec<Bytes>>>,
    pub closes: Arc<AtomicUsize>,
    pub write_delay: Option<Duration>,
}

#[async_trait]
impl ChannelWriter for RecordingWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.written.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Channel whose device side produces `chunks` and then ends
pub fn finite_channel(chunks: Vec<Bytes>, writer: RecordingWriter) -> Channel {
    Channel {
        service: "test:".to_string(),
        readable: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        writable: Box::new(writer),
    }
}

/// Channel whose device side never produces output
pub fn silent_channel(writer: RecordingWriter) -> Channel {
    Channel {
        service: "test:".to_string(),
        readable: stream::pending::<Result<Bytes>>().boxed(),
        writable: Box::new(writer),
    }
}

pub fn readable_from(
    rx: tokio::sync::mpsc::UnboundedReceiver<Bytes>,
) -> BoxStream<'static, Result<Bytes>> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    })
    .boxed()
}
