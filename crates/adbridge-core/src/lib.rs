//! adbridge core - device sessions, presence and stream bridging
//!
//! This crate holds everything between the device backend and the network
//! front door:
//! - Session registry: one authenticated transport per device serial
//! - Presence broadcaster: live device list fanned out to observers
//! - Stream bridge: one remote connection <-> one device channel, with
//!   backpressure in both directions
//! - Collaborator traits the device backend implements

pub mod bridge;
pub mod device;
pub mod error;
pub mod presence;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeEnd, BridgeOptions, BridgeStats, DEFAULT_HIGH_WATER_MARK};
pub use device::{Banner, DeviceId, DeviceSummary};
pub use error::{BridgeError, Result};
pub use presence::{ObserverId, PresenceBroadcaster, Subscription};
pub use registry::{Session, SessionRegistry};
pub use transport::{
    Authenticator, Channel, ChannelWriter, Credential, CredentialProvider, DeviceConnection,
    DeviceDiscovery, DeviceTransport, RawDevice,
};
