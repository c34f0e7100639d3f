//! In-process stub connector for tests and the `stub` platform profile.
//!
//! Behaves like a fresh WhatsApp Web login: reports `connecting`, then after
//! a delay emits a credentials update and a pairing QR. Optionally rotates
//! the QR, reports `open` when credentials already exist, or fails on demand.

use async_trait::async_trait;
use pairgate_core::config::StubConfig;
use pairgate_core::credentials::CredentialSnapshot;
use pairgate_core::error::PairgateError;
use pairgate_core::event::{ConnectionState, ConnectionUpdate, UpstreamEvent};
use pairgate_core::traits::{
    ConnectOptions, ConnectionHandle, Connector, ProtocolVersion, UpstreamConnection,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

/// Connector that fakes an upstream without touching the network.
pub struct StubConnector {
    config: StubConfig,
}

impl StubConnector {
    pub fn new(config: StubConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for StubConnector {
    fn name(&self) -> &str {
        "stub"
    }

    async fn latest_version(&self) -> Result<ProtocolVersion, PairgateError> {
        Ok(self.config.version)
    }

    async fn connect(&self, options: ConnectOptions) -> Result<UpstreamConnection, PairgateError> {
        if self.config.fail_connect {
            return Err(PairgateError::Upstream("stub connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        let has_creds = !options.auth.is_empty();
        let task = tokio::spawn(run(self.config.clone(), has_creds, tx));

        Ok(UpstreamConnection {
            handle: Box::new(StubHandle {
                task: task.abort_handle(),
                fail_logout: self.config.fail_logout,
            }),
            events: rx,
        })
    }
}

/// Synthetic pairing payload in the `ref,noiseKey,identityKey,adv` shape.
pub fn synthetic_qr() -> String {
    format!(
        "2@{},{},{},{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Returns false once the receiver is gone.
async fn emit(tx: &mpsc::Sender<UpstreamEvent>, update: ConnectionUpdate) -> bool {
    tx.send(UpstreamEvent::ConnectionUpdate(update)).await.is_ok()
}

async fn run(config: StubConfig, has_creds: bool, tx: mpsc::Sender<UpstreamEvent>) {
    if !emit(&tx, ConnectionUpdate::state(ConnectionState::Connecting)).await {
        return;
    }
    tokio::time::sleep(Duration::from_millis(config.qr_delay_ms)).await;

    if has_creds && config.open_with_credentials {
        debug!("stub: credentials present, reporting open");
        emit(&tx, ConnectionUpdate::state(ConnectionState::Open)).await;
        return;
    }

    let mut creds = CredentialSnapshot::new();
    creds.insert(
        "creds.json",
        format!("{{\"registrationId\":{}}}", Uuid::new_v4().as_u128() % 16_384),
    );
    if tx.send(UpstreamEvent::CredsUpdate(creds)).await.is_err() {
        return;
    }

    if !config.emit_qr {
        // Hold the channel open so the session sees silence, not a hangup.
        std::future::pending::<()>().await;
        return;
    }

    let mut first = true;
    loop {
        if !emit(&tx, ConnectionUpdate::qr(synthetic_qr())).await {
            return;
        }
        if first && config.creds_after_qr {
            let mut keys = CredentialSnapshot::new();
            keys.insert("pre-key-1.json", b"{\"keyId\":1}".to_vec());
            if tx.send(UpstreamEvent::CredsUpdate(keys)).await.is_err() {
                return;
            }
        }
        first = false;
        if config.qr_rotate_ms == 0 {
            std::future::pending::<()>().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(config.qr_rotate_ms)).await;
    }
}

struct StubHandle {
    task: AbortHandle,
    fail_logout: bool,
}

#[async_trait]
impl ConnectionHandle for StubHandle {
    async fn logout(&self) -> Result<(), PairgateError> {
        self.task.abort();
        if self.fail_logout {
            return Err(PairgateError::Upstream("stub logout failed".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PairgateError> {
        self.task.abort();
        Ok(())
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
