//! Events emitted by an upstream connection.

use crate::credentials::CredentialSnapshot;
use serde::{Deserialize, Serialize};

/// Connection state as reported by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// A "connection status changed" notification. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    /// Pairing QR payload, present while the device is unlinked.
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn qr(code: impl Into<String>) -> Self {
        Self {
            connection: None,
            qr: Some(code.into()),
        }
    }

    pub fn state(state: ConnectionState) -> Self {
        Self {
            connection: Some(state),
            qr: None,
        }
    }

    /// The QR payload, ignoring empty strings.
    pub fn qr_code(&self) -> Option<&str> {
        self.qr.as_deref().filter(|q| !q.is_empty())
    }

    pub fn is_open(&self) -> bool {
        self.connection == Some(ConnectionState::Open)
    }
}

/// Everything an upstream connection can tell us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// New credential material to persist.
    CredsUpdate(CredentialSnapshot),
    ConnectionUpdate(ConnectionUpdate),
}
