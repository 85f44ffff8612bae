//! Collaborator interfaces: discovery, low-level connections, authentication,
//! device transports and their logical channels
//!
//! adbridge never speaks the device protocol itself. Everything below is
//! implemented by a backend (USB, loopback, ...) and consumed through
//! trait objects.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;

use crate::device::{Banner, DeviceId, DeviceSummary};
use crate::error::Result;

/// Enumerates attached devices and reports list changes
#[async_trait]
pub trait DeviceDiscovery: Send + Sync + 'static {
    /// Current device list
    async fn list(&self) -> Result<Vec<DeviceSummary>>;

    /// Subscribe to list changes; every message carries the full new list
    fn watch(&self) -> broadcast::Receiver<Vec<DeviceSummary>>;

    /// Look up an attached device by serial
    async fn find(&self, identity: &DeviceId) -> Result<Option<Box<dyn RawDevice>>>;
}

/// A discovered device that has not been opened yet
#[async_trait]
pub trait RawDevice: Send {
    fn identity(&self) -> &DeviceId;

    /// Open the low-level link to the device
    async fn connect(self: Box<Self>) -> Result<Box<dyn DeviceConnection>>;
}

/// Packet pipe to a device, used by an [`Authenticator`] to run the handshake
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    async fn read_packet(&self) -> Result<Bytes>;
    async fn write_packet(&self, packet: Bytes) -> Result<()>;
    async fn close(&self);
}

/// Signing material for device authentication
#[derive(Clone)]
pub struct Credential {
    /// Key name presented to the device (usually `user@host`)
    pub name: String,
    /// PKCS#8 private key
    pub private_key: Bytes,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("private_key", &format_args!("<{} bytes>", self.private_key.len()))
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn credentials(&self) -> Result<Vec<Credential>>;
}

/// Runs the authentication handshake over a fresh connection
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(
        &self,
        identity: &DeviceId,
        connection: Box<dyn DeviceConnection>,
        credentials: &dyn CredentialProvider,
    ) -> Result<std::sync::Arc<dyn DeviceTransport>>;
}

/// One authenticated connection to one device
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Negotiated maximum payload per frame
    fn max_payload_size(&self) -> u32;

    fn banner(&self) -> &Banner;

    /// Open a named logical channel ("shell:", "sync:", ...)
    async fn connect(&self, service: &str) -> Result<Channel>;

    /// Tear the transport down; idempotent
    async fn close(&self);
}

/// Write half of a logical channel
#[async_trait]
pub trait ChannelWriter: Send {
    /// Resolves once the device side accepted the chunk
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Close the channel; calling it again is a no-op
    async fn close(&mut self);
}

/// A logical duplex byte stream multiplexed over a transport
///
/// `readable` ending means the device closed the channel.
pub struct Channel {
    pub service: String,
    pub readable: BoxStream<'static, Result<Bytes>>,
    pub writable: Box<dyn ChannelWriter>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("service", &self.service).finish()
    }
}
