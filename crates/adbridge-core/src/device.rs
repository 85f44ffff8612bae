//! Device identity, presence summaries and the identity banner

use serde::{Deserialize, Serialize};

/// Unique identifier for a physical device (its serial number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(serial: &str) -> Self {
        Self(serial.to_string())
    }
}

/// Snapshot of a discoverable device, as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Device serial
    pub id: DeviceId,
    /// Human-readable name (usually the USB product string)
    pub name: String,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

/// Wire form of a presence entry: `{serial, name, vendorId, productId}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresenceEntry<'a> {
    pub serial: &'a str,
    pub name: &'a str,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl<'a> From<&'a DeviceSummary> for PresenceEntry<'a> {
    fn from(device: &'a DeviceSummary) -> Self {
        Self {
            serial: device.id.as_str(),
            name: &device.name,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
        }
    }
}

/// Identity banner a device reports during the connection handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Banner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub features: Vec<String>,
}

impl Banner {
    /// Parse a banner of the form
    /// `device::ro.product.name=x;ro.product.model=y;ro.product.device=z;features=a,b`.
    ///
    /// Unknown keys are ignored. Anything before `::` (the connection state) is
    /// skipped.
    pub fn parse(raw: &str) -> Self {
        let properties = match raw.split_once("::") {
            Some((_, rest)) => rest,
            None => raw,
        };

        let mut banner = Banner::default();
        for pair in properties.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ro.product.name" => banner.product = Some(value.to_string()),
                "ro.product.model" => banner.model = Some(value.to_string()),
                "ro.product.device" => banner.device = Some(value.to_string()),
                "features" => {
                    banner.features = value
                        .split(',')
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                _ => {}
            }
        }
        banner
    }

    /// Render back to the banner string understood by [`Banner::parse`]
    pub fn to_banner_string(&self) -> String {
        let mut out = String::from("device::");
        if let Some(product) = &self.product {
            out.push_str(&format!("ro.product.name={};", product));
        }
        if let Some(model) = &self.model {
            out.push_str(&format!("ro.product.model={};", model));
        }
        if let Some(device) = &self.device {
            out.push_str(&format!("ro.product.device={};", device));
        }
        out.push_str(&format!("features={}", self.features.join(",")));
        out
    }
}
