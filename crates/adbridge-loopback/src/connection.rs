//! Packet pipe to a loopback device
//!
//! The device answers each packet synchronously:
//!
//! | host sends     | device replies                      |
//! |----------------|-------------------------------------|
//! | `AUTH`         | `OKAY` or `FAIL`                    |
//! | `AUTH <name>`  | `OKAY` or `FAIL`                    |
//! | `CNXN`         | `CNXN <max payload> <banner>`       |
//!
//! `CNXN` before a successful `AUTH` is answered with `FAIL`.

use adbridge_core::{BridgeError, DeviceConnection, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::trace;

use crate::profile::LoopbackProfile;

pub const AUTH: &str = "AUTH";
pub const CNXN: &str = "CNXN";
pub const OKAY: &str = "OKAY";
pub const FAIL: &str = "FAIL";

struct Link {
    replies: VecDeque<Bytes>,
    authorized: bool,
    closed: bool,
}

pub struct LoopbackConnection {
    profile: LoopbackProfile,
    link: Mutex<Link>,
}

impl LoopbackConnection {
    pub fn new(profile: LoopbackProfile) -> Self {
        Self {
            profile,
            link: Mutex::new(Link {
                replies: VecDeque::new(),
                authorized: false,
                closed: false,
            }),
        }
    }

    fn answer(&self, link: &mut Link, packet: &str) -> String {
        let (command, argument) = match packet.split_once(' ') {
            Some((command, argument)) => (command, Some(argument)),
            None => (packet, None),
        };

        match command {
            AUTH if self.profile.accepts(argument) => {
                link.authorized = true;
                OKAY.to_string()
            }
            CNXN if link.authorized => format!(
                "{} {} {}",
                CNXN,
                self.profile.max_payload_size,
                self.profile.banner.to_banner_string()
            ),
            _ => FAIL.to_string(),
        }
    }
}

#[async_trait]
impl DeviceConnection for LoopbackConnection {
    async fn read_packet(&self) -> Result<Bytes> {
        let mut link = self.link.lock().await;
        if link.closed {
            return Err(BridgeError::Transport("connection closed".to_string()));
        }
        link.replies
            .pop_front()
            .ok_or_else(|| BridgeError::ProtocolViolation("read with no reply pending".to_string()))
    }

    async fn write_packet(&self, packet: Bytes) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.closed {
            return Err(BridgeError::Transport("connection closed".to_string()));
        }
        let packet = String::from_utf8_lossy(&packet);
        trace!(serial = %self.profile.serial, packet = %packet, "Loopback packet");
        let reply = self.answer(&mut link, &packet);
        link.replies.push_back(Bytes::from(reply));
        Ok(())
    }

    async fn close(&self) {
        let mut link = self.link.lock().await;
        link.closed = true;
        link.replies.clear();
    }
}
