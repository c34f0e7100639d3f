//! The upstream connector seam.
//!
//! The WhatsApp Web protocol lives outside this workspace. A [`Connector`]
//! opens one connection attempt and hands back an [`UpstreamConnection`]:
//! a handle for logout plus a stream of [`UpstreamEvent`]s.

use crate::credentials::CredentialSnapshot;
use crate::error::PairgateError;
use crate::event::UpstreamEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// A protocol version triple, e.g. `2.3000.1015901307`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Identifying client strings reported to WhatsApp (shown under Linked Devices).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientIdentity {
    pub os: String,
    pub browser: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            os: "Ubuntu".to_string(),
            browser: "Chrome".to_string(),
            version: "110.0.0".to_string(),
        }
    }
}

impl ClientIdentity {
    pub fn as_triple(&self) -> [&str; 3] {
        [&self.os, &self.browser, &self.version]
    }
}

/// Fixed configuration for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub version: ProtocolVersion,
    /// Persisted credentials, empty on first pairing.
    pub auth: CredentialSnapshot,
    pub client: ClientIdentity,
    pub connect_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
}

/// Control side of an open upstream connection.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Unlink the device and close the connection.
    async fn logout(&self) -> Result<(), PairgateError>;

    /// Close the connection without unlinking. Default is a no-op.
    async fn close(&self) -> Result<(), PairgateError> {
        Ok(())
    }
}

/// A freshly opened connection: control handle plus its event stream.
pub struct UpstreamConnection {
    pub handle: Box<dyn ConnectionHandle>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

/// Factory for upstream connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Latest protocol version the upstream accepts.
    async fn latest_version(&self) -> Result<ProtocolVersion, PairgateError>;

    /// Open one connection attempt.
    async fn connect(&self, options: ConnectOptions) -> Result<UpstreamConnection, PairgateError>;
}
