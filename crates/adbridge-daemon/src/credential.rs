//! Host key store read from disk

use adbridge_core::{BridgeError, Credential, CredentialProvider, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads the PEM private key at `key_path` and its name from `<key_path>.pub`
pub struct FileCredentialStore {
    key_path: Option<PathBuf>,
}

impl FileCredentialStore {
    pub fn new(key_path: Option<PathBuf>) -> Self {
        Self { key_path }
    }

    fn public_key_path(key_path: &Path) -> PathBuf {
        let mut path = OsString::from(key_path.as_os_str());
        path.push(".pub");
        PathBuf::from(path)
    }

    async fn key_name(&self, key_path: &Path) -> String {
        match tokio::fs::read_to_string(Self::public_key_path(key_path)).await {
            Ok(content) => content
                .split_whitespace()
                .nth(1)
                .map(str::to_string)
                .unwrap_or_else(default_key_name),
            Err(_) => default_key_name(),
        }
    }
}

/// `user@host` of the running process
fn default_key_name() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", user, host)
}

/// Decode the base64 body of a PEM document
fn decode_pem(content: &str) -> Result<Bytes> {
    let body: String = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| BridgeError::transport(format!("invalid key file: {}", e)))?;
    Ok(Bytes::from(der))
}

#[async_trait]
impl CredentialProvider for FileCredentialStore {
    async fn credentials(&self) -> Result<Vec<Credential>> {
        let Some(key_path) = &self.key_path else {
            return Ok(Vec::new());
        };

        let content = match tokio::fs::read_to_string(key_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %key_path.display(), "No host key, offering none");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(path = %key_path.display(), error = %e, "Failed to read host key");
                return Err(e.into());
            }
        };

        Ok(vec![Credential {
            name: self.key_name(key_path).await,
            private_key: decode_pem(&content)?,
        }])
    }
}
