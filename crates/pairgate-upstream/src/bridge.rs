//! Bridge connector: runs an external WhatsApp Web client as a child process.
//!
//! The child receives one `connect` command on stdin and streams events back
//! on stdout, one JSON object per line (see [`crate::protocol`]). It is
//! killed when the handle is dropped.

use crate::protocol::{parse_line, BridgeCommand};
use crate::version;
use async_trait::async_trait;
use pairgate_core::config::BridgeConfig;
use pairgate_core::error::PairgateError;
use pairgate_core::traits::{
    ConnectOptions, ConnectionHandle, Connector, ProtocolVersion, UpstreamConnection,
};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// How long a logging-out bridge gets to exit on its own before it is killed.
const LOGOUT_GRACE: Duration = Duration::from_secs(3);

/// Connector backed by an external bridge process.
pub struct BridgeConnector {
    config: BridgeConfig,
    version_url: String,
    fallback_version: ProtocolVersion,
    http: reqwest::Client,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig, version_url: String, fallback_version: ProtocolVersion) -> Self {
        Self {
            config,
            version_url,
            fallback_version,
            http: reqwest::Client::new(),
        }
    }

    /// Build the child command. Extracted so it is testable without spawning.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Check that the bridge program can be launched at all.
    pub async fn check_program(&self) -> Result<(), PairgateError> {
        let status = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                PairgateError::Upstream(format!(
                    "bridge program '{}' not runnable: {e}",
                    self.config.program
                ))
            })?;
        if !status.success() {
            return Err(PairgateError::Upstream(format!(
                "bridge program '{}' exited with {status}",
                self.config.program
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn latest_version(&self) -> Result<ProtocolVersion, PairgateError> {
        Ok(version::latest_or_fallback(&self.http, &self.version_url, self.fallback_version).await)
    }

    async fn connect(&self, options: ConnectOptions) -> Result<UpstreamConnection, PairgateError> {
        let mut child = self.command().spawn().map_err(|e| {
            PairgateError::Upstream(format!(
                "failed to spawn bridge '{}': {e}",
                self.config.program
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PairgateError::Upstream("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PairgateError::Upstream("bridge stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let line = BridgeCommand::connect(&options).to_line()?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PairgateError::Upstream(format!("bridge rejected connect: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| PairgateError::Upstream(format!("bridge rejected connect: {e}")))?;

        info!(
            "bridge started (pid {:?}, version {})",
            child.id(),
            options.version
        );

        let (tx, rx) = mpsc::channel(32);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&line) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("bridge stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!("bridge stdout read failed: {e}");
                        break;
                    }
                }
            }
        });

        let stderr_task = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("bridge: {line}");
                }
            })
            .abort_handle()
        });

        Ok(UpstreamConnection {
            handle: Box::new(BridgeHandle {
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(child),
                reader: reader.abort_handle(),
                stderr: stderr_task,
            }),
            events: rx,
        })
    }
}

struct BridgeHandle {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    reader: AbortHandle,
    stderr: Option<AbortHandle>,
}

impl BridgeHandle {
    async fn send(&self, command: BridgeCommand<'_>) -> Result<(), PairgateError> {
        let line = command.to_line()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| PairgateError::Upstream("bridge already closed".into()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PairgateError::Upstream(format!("bridge write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| PairgateError::Upstream(format!("bridge write failed: {e}")))
    }

    async fn shutdown(&self) -> Result<(), PairgateError> {
        // Closing stdin tells the bridge to exit.
        self.stdin.lock().await.take();
        self.reader.abort();
        if let Some(stderr) = &self.stderr {
            stderr.abort();
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(LOGOUT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("bridge exited with {status}");
                Ok(())
            }
            Ok(Err(e)) => Err(PairgateError::Upstream(format!("bridge wait failed: {e}"))),
            Err(_) => {
                debug!("bridge did not exit in {LOGOUT_GRACE:?}, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| PairgateError::Upstream(format!("bridge kill failed: {e}")))
            }
        }
    }
}

#[async_trait]
impl ConnectionHandle for BridgeHandle {
    async fn logout(&self) -> Result<(), PairgateError> {
        let sent = self.send(BridgeCommand::Logout).await;
        let closed = self.shutdown().await;
        sent.and(closed)
    }

    async fn close(&self) -> Result<(), PairgateError> {
        self.shutdown().await
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(stderr) = &self.stderr {
            stderr.abort();
        }
    }
}
