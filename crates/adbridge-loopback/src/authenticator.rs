//! Handshake against a loopback device

use adbridge_core::{
    Authenticator, Banner, BridgeError, Credential, CredentialProvider, DeviceConnection,
    DeviceId, DeviceTransport, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::connection::{AUTH, CNXN, OKAY};
use crate::transport::LoopbackTransport;

/// Offers each stored key in turn, then negotiates the connection
#[derive(Debug, Default)]
pub struct LoopbackAuthenticator;

impl LoopbackAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

async fn exchange(connection: &dyn DeviceConnection, packet: String) -> Result<String> {
    connection.write_packet(Bytes::from(packet)).await?;
    let reply = connection.read_packet().await?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

/// Parse `CNXN <max payload> <banner>`
fn parse_connect(reply: &str) -> Result<(u32, Banner)> {
    let malformed =
        || BridgeError::ProtocolViolation(format!("unexpected connect reply: {}", reply));

    let rest = reply
        .strip_prefix(CNXN)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or_else(malformed)?;
    let (max_payload, banner) = rest.split_once(' ').ok_or_else(malformed)?;
    let max_payload = max_payload.parse::<u32>().map_err(|_| malformed())?;

    Ok((max_payload, Banner::parse(banner)))
}

/// Offer keys until one is accepted, then negotiate payload size and banner
async fn handshake(
    identity: &DeviceId,
    connection: &dyn DeviceConnection,
    keys: &[Credential],
) -> Result<(u32, Banner)> {
    let mut offers: Vec<String> = keys
        .iter()
        .map(|key| format!("{} {}", AUTH, key.name))
        .collect();
    if offers.is_empty() {
        offers.push(AUTH.to_string());
    }

    let mut accepted = false;
    for offer in offers {
        if exchange(connection, offer).await? == OKAY {
            accepted = true;
            break;
        }
    }
    if !accepted {
        return Err(BridgeError::AuthenticationFailed {
            identity: identity.clone(),
            reason: format!("device rejected {} key(s)", keys.len()),
        });
    }

    let reply = exchange(connection, CNXN.to_string()).await?;
    parse_connect(&reply)
}

#[async_trait]
impl Authenticator for LoopbackAuthenticator {
    async fn authenticate(
        &self,
        identity: &DeviceId,
        connection: Box<dyn DeviceConnection>,
        credentials: &dyn CredentialProvider,
    ) -> Result<Arc<dyn DeviceTransport>> {
        let negotiated = match credentials.credentials().await {
            Ok(keys) => handshake(identity, connection.as_ref(), &keys).await,
            Err(e) => Err(e),
        };
        let (max_payload_size, banner) = match negotiated {
            Ok(negotiated) => negotiated,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        debug!(serial = %identity, max_payload_size, "Loopback handshake complete");

        Ok(Arc::new(LoopbackTransport::new(
            identity.clone(),
            max_payload_size,
            banner,
            connection,
        )))
    }
}
