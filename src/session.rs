//! Pairing session manager.
//!
//! Owns at most one upstream connection attempt. Each `start()` supersedes
//! the previous attempt, opens a new connection, and waits for the first of:
//! a QR code, an `open` connection state, or the QR timeout.

use chrono::{DateTime, Utc};
use pairgate_core::{
    config::Config,
    credentials::{CredentialSnapshot, CredentialStore},
    error::PairgateError,
    event::{ConnectionState, ConnectionUpdate, UpstreamEvent},
    traits::{ClientIdentity, ConnectOptions, ConnectionHandle, Connector},
};
use pairgate_upstream::generate_qr_terminal;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-attempt settings, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub qr_timeout: Duration,
    pub logout_timeout: Duration,
    pub print_qr_in_terminal: bool,
    pub client: ClientIdentity,
    pub connect_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            qr_timeout: config.qr_timeout(),
            logout_timeout: config.logout_timeout(),
            print_qr_in_terminal: config.session.print_qr_in_terminal,
            client: config.upstream.client.clone(),
            connect_timeout_ms: config.upstream.connect_timeout_ms,
            keep_alive_interval_ms: config.upstream.keep_alive_interval_ms,
        }
    }
}

/// How one `start()` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// A pairing QR payload to hand to the caller.
    Qr(String),
    /// Stored credentials were accepted; no QR needed.
    Connected,
    /// Nothing arrived before the QR timeout.
    TimedOut,
    /// A newer `start()` replaced this attempt before it resolved.
    Superseded,
}

/// Link status of the active session, observable through [`SessionManager::watch_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    AwaitingScan,
    Open,
    Closed,
}

/// What an event source hands to the waiting caller.
#[derive(Debug)]
enum Resolution {
    Qr(String),
    Connected,
    /// The upstream event stream ended first.
    Ended,
}

enum SlotState {
    Pending(oneshot::Sender<Resolution>),
    Completed,
}

/// One-shot reply shared by the event pump and the waiter.
///
/// The first `resolve` wins; every later `resolve` or `close` is a no-op.
struct ReplySlot {
    state: StdMutex<SlotState>,
}

impl ReplySlot {
    fn new() -> (Arc<Self>, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            state: StdMutex::new(SlotState::Pending(tx)),
        });
        (slot, rx)
    }

    /// Deliver `resolution` if still pending. Returns true if this call won.
    fn resolve(&self, resolution: Resolution) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, SlotState::Completed) {
            SlotState::Pending(tx) => tx.send(resolution).is_ok(),
            SlotState::Completed => false,
        }
    }

    /// Mark completed without a value; the waiter sees a closed channel.
    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = SlotState::Completed;
    }

    fn is_pending(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(*state, SlotState::Pending(_))
    }
}

/// The one live connection attempt.
struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    handle: Box<dyn ConnectionHandle>,
    pump: JoinHandle<()>,
    reply: Arc<ReplySlot>,
}

/// Snapshot of the active session for status reporting.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub awaiting_reply: bool,
}

/// Owns the upstream connector and at most one active session.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    store: CredentialStore,
    settings: SessionSettings,
    active: Mutex<Option<ActiveSession>>,
    /// Serializes the supersede-then-open phase of `start()`.
    setup: Mutex<()>,
    link: Arc<watch::Sender<LinkState>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: CredentialStore,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            store,
            settings,
            active: Mutex::new(None),
            setup: Mutex::new(()),
            link: Arc::new(watch::channel(LinkState::Idle).0),
        }
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    pub fn qr_timeout(&self) -> Duration {
        self.settings.qr_timeout
    }

    pub async fn info(&self) -> Option<SessionInfo> {
        self.active.lock().await.as_ref().map(|s| SessionInfo {
            id: s.id,
            started_at: s.started_at,
            awaiting_reply: s.reply.is_pending(),
        })
    }

    /// Run one pairing attempt to its first outcome.
    ///
    /// Setup failures (credentials, version lookup, connect) are returned as
    /// errors; everything after setup is a [`PairingOutcome`].
    pub async fn start(&self) -> Result<PairingOutcome, PairgateError> {
        let (id, reply, rx) = {
            let _setup = self.setup.lock().await;
            self.supersede().await;

            let (session, rx) = self.open().await?;
            let handles = (session.id, session.reply.clone(), rx);
            *self.active.lock().await = Some(session);
            handles
        };

        match tokio::time::timeout(self.settings.qr_timeout, rx).await {
            Ok(Ok(Resolution::Qr(qr))) => Ok(PairingOutcome::Qr(qr)),
            Ok(Ok(Resolution::Connected)) => Ok(PairingOutcome::Connected),
            Ok(Ok(Resolution::Ended)) => Err(PairgateError::Upstream(
                "connection closed before a QR code was issued".into(),
            )),
            Ok(Err(_)) => {
                info!("session {id} superseded before it resolved");
                Ok(PairingOutcome::Superseded)
            }
            Err(_) => {
                // Late QR events must not reach this caller.
                reply.close();
                warn!(
                    "session {id}: no QR within {}s",
                    self.settings.qr_timeout.as_secs()
                );
                Ok(PairingOutcome::TimedOut)
            }
        }
    }

    /// Retire the active session, if any. Returns whether one existed.
    pub async fn supersede(&self) -> bool {
        match self.active.lock().await.take() {
            Some(previous) => {
                self.retire(previous);
                true
            }
            None => false,
        }
    }

    /// Close the active session without unlinking the device and wait for
    /// pending credential writes. Used on process shutdown.
    pub async fn shutdown(&self) {
        let Some(session) = self.active.lock().await.take() else {
            return;
        };
        let id = session.id;
        session.reply.close();

        match tokio::time::timeout(self.settings.logout_timeout, session.handle.close()).await {
            Ok(Ok(())) => debug!("session {id} closed"),
            Ok(Err(e)) => debug!("session {id}: ignoring close failure: {e}"),
            Err(_) => debug!("session {id}: close timed out"),
        }
        if tokio::time::timeout(self.settings.logout_timeout, session.pump)
            .await
            .is_err()
        {
            warn!("session {id}: event pump did not drain before shutdown");
        }
        self.link.send_replace(LinkState::Idle);
    }

    /// Load credentials, negotiate the version, connect, and start the pump.
    async fn open(&self) -> Result<(ActiveSession, oneshot::Receiver<Resolution>), PairgateError> {
        let auth = self.store.load().await?;
        let version = self.connector.latest_version().await?;

        let options = ConnectOptions {
            version,
            auth,
            client: self.settings.client.clone(),
            connect_timeout_ms: self.settings.connect_timeout_ms,
            keep_alive_interval_ms: self.settings.keep_alive_interval_ms,
        };
        let connection = self.connector.connect(options).await?;
        self.link.send_replace(LinkState::Connecting);

        let id = Uuid::new_v4();
        let (reply, rx) = ReplySlot::new();
        let pump = tokio::spawn(pump_events(
            id,
            connection.events,
            reply.clone(),
            self.link.clone(),
            self.store.clone(),
            self.settings.print_qr_in_terminal,
        ));

        info!(
            "session {id} started via {} (version {version})",
            self.connector.name()
        );

        Ok((
            ActiveSession {
                id,
                started_at: Utc::now(),
                handle: connection.handle,
                pump,
                reply,
            },
            rx,
        ))
    }

    /// Best-effort teardown. Never blocks the caller, never reports failure.
    fn retire(&self, previous: ActiveSession) {
        let ActiveSession {
            id,
            handle,
            pump,
            reply,
            ..
        } = previous;

        reply.close();
        pump.abort();
        self.link.send_replace(LinkState::Idle);

        let timeout = self.settings.logout_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, handle.logout()).await {
                Ok(Ok(())) => debug!("session {id} logged out"),
                Ok(Err(e)) => debug!("session {id}: ignoring logout failure: {e}"),
                Err(_) => debug!("session {id}: logout timed out"),
            }
        });
    }
}

/// React to upstream events for the lifetime of one session.
async fn pump_events(
    id: Uuid,
    mut events: mpsc::Receiver<UpstreamEvent>,
    reply: Arc<ReplySlot>,
    link: Arc<watch::Sender<LinkState>>,
    store: CredentialStore,
    print_qr: bool,
) {
    let (creds_tx, writer) = spawn_creds_writer(id, store);

    while let Some(event) = events.recv().await {
        match event {
            UpstreamEvent::CredsUpdate(snapshot) => {
                if creds_tx.send(snapshot).is_err() {
                    error!("session {id}: credentials writer gone, update dropped");
                }
            }
            UpstreamEvent::ConnectionUpdate(update) => {
                handle_connection_update(id, &update, &reply, &link, print_qr);
            }
        }
    }

    // Let queued credential writes finish before the session is gone.
    drop(creds_tx);
    if let Err(e) = writer.await {
        error!("session {id}: credentials writer failed: {e}");
    }

    if reply.resolve(Resolution::Ended) {
        warn!("session {id}: upstream closed before a QR code was issued");
    } else {
        debug!("session {id}: upstream event stream ended");
    }
}

fn handle_connection_update(
    id: Uuid,
    update: &ConnectionUpdate,
    reply: &ReplySlot,
    link: &watch::Sender<LinkState>,
    print_qr: bool,
) {
    if let Some(state) = update.connection {
        debug!("session {id}: connection {state:?}");
    }

    if let Some(qr) = update.qr_code() {
        if print_qr {
            match generate_qr_terminal(qr) {
                Ok(art) => info!("scan with WhatsApp → Linked Devices\n{art}"),
                Err(e) => warn!("session {id}: could not render QR: {e}"),
            }
        }
        link.send_replace(LinkState::AwaitingScan);
        if reply.resolve(Resolution::Qr(qr.to_string())) {
            info!("session {id}: QR generated");
        } else {
            debug!("session {id}: QR refreshed after reply completed");
        }
    }

    match update.connection {
        Some(ConnectionState::Open) => {
            info!("session {id}: WhatsApp connected");
            link.send_replace(LinkState::Open);
            reply.resolve(Resolution::Connected);
        }
        Some(ConnectionState::Close) => {
            warn!("session {id}: connection closed");
            link.send_replace(LinkState::Closed);
        }
        _ => {}
    }
}

/// Persist credential updates in order, off the event path.
fn spawn_creds_writer(
    id: Uuid,
    store: CredentialStore,
) -> (mpsc::UnboundedSender<CredentialSnapshot>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<CredentialSnapshot>();
    let writer = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            match store.save(&snapshot).await {
                Ok(()) => debug!("session {id}: saved {} credential file(s)", snapshot.len()),
                Err(e) => error!("session {id}: failed to save credentials: {e}"),
            }
        }
    });
    (tx, writer)
}
