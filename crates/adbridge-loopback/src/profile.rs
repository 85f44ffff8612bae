//! Loopback device profiles

use adbridge_core::{Banner, DeviceId, DeviceSummary};
use serde::{Deserialize, Serialize};

/// Description of one simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackProfile {
    /// Serial number
    pub serial: String,
    /// Product string reported to presence observers
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// Largest chunk the device emits in one frame
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u32,
    #[serde(default)]
    pub banner: Banner,
    /// Key names the device accepts; empty accepts any key
    #[serde(default)]
    pub authorized_keys: Vec<String>,
}

fn default_name() -> String {
    "Loopback Device".to_string()
}

fn default_vendor_id() -> u16 {
    0x18d1
}

fn default_product_id() -> u16 {
    0x4ee7
}

fn default_max_payload_size() -> u32 {
    256 * 1024
}

impl LoopbackProfile {
    /// Profile with defaults for everything but the serial
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: default_name(),
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            max_payload_size: default_max_payload_size(),
            banner: Banner {
                product: Some("loopback".to_string()),
                model: Some("Loopback".to_string()),
                device: Some("loopback".to_string()),
                features: vec!["shell_v2".to_string(), "cmd".to_string()],
            },
            authorized_keys: Vec::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.serial.clone())
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id(),
            name: self.name.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    /// Whether a key with this name (or no key at all) is let in
    pub fn accepts(&self, key_name: Option<&str>) -> bool {
        if self.authorized_keys.is_empty() {
            return true;
        }
        key_name.is_some_and(|name| self.authorized_keys.iter().any(|k| k == name))
    }
}
