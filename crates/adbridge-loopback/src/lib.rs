//! adbridge loopback - in-process device backend
//!
//! Simulated devices that implement the full collaborator surface of
//! `adbridge-core` without any hardware:
//! - Discovery with attach/detach notifications
//! - Packet-level key offer and connect handshake
//! - `echo` and `shell` channels

pub mod authenticator;
pub mod connection;
pub mod discovery;
pub mod profile;
pub mod services;
pub mod transport;

pub use authenticator::LoopbackAuthenticator;
pub use discovery::LoopbackDiscovery;
pub use profile::LoopbackProfile;
pub use transport::LoopbackTransport;
