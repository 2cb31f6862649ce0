//! Connection lifecycle: clock gate, token issue, connect, supervise,
//! refresh and reconnect.
//!
//! `SessionManager` owns the single live session. Publishers share a
//! [`SessionContext`] with it and only ever see a session while the state
//! is `Connected`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::Instant;

use ciot_protocol::device::UNUSED_USERNAME;
use ciot_protocol::topics;

use crate::clock::{self, Clock};
use crate::config::SessionConfig;
use crate::credentials::CredentialStore;
use crate::error::{MqttError, MqttResult};
use crate::handler::{IncomingMessage, classify};
use crate::publisher::TelemetryPublisher;
use crate::token::TokenIssuer;
use crate::transport::{ConnectRequest, Connector, TransportSession};
use crate::trust::TrustAnchorSet;

/// Lifecycle state of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Unrecoverable without new inputs; no further attempts are made.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        })
    }
}

/// Capacity of the transition broadcast. Slow observers see `Lagged`.
const TRANSITION_BUFFER: usize = 64;

pub(crate) struct ActiveSession<S> {
    pub(crate) session: Arc<S>,
    pub(crate) token_expires_at: DateTime<Utc>,
    refresh_at: Instant,
}

/// State shared between the manager and its publishers.
pub struct SessionContext<S> {
    device_id: String,
    state_tx: watch::Sender<SessionState>,
    transitions: broadcast::Sender<SessionState>,
    pub(crate) active: Mutex<Option<ActiveSession<S>>>,
}

impl<S> SessionContext<S> {
    fn new(device_id: String) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            device_id,
            state_tx,
            transitions,
            active: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::info!(
                device_id = %self.device_id,
                from = %previous,
                to = %next,
                "session state changed"
            );
            // No subscribers is fine.
            let _ = self.transitions.send(next);
        }
    }

    async fn take_active(&self) -> Option<ActiveSession<S>> {
        self.active.lock().await.take()
    }
}

enum Supervision {
    Lost(MqttError),
    Refresh,
    Shutdown,
}

/// Drives one device session against a [`Connector`].
pub struct SessionManager<C: Connector> {
    connector: C,
    issuer: TokenIssuer,
    client_id: String,
    trust: TrustAnchorSet,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    context: Arc<SessionContext<C::Session>>,
    /// At most one connect attempt in flight.
    connect_lock: Mutex<()>,
    clock_synced: AtomicBool,
    attempts: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(
        connector: C,
        credentials: &CredentialStore,
        trust: TrustAnchorSet,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> MqttResult<Self> {
        config.validate()?;
        let issuer = TokenIssuer::new(credentials, config.jwt_validity())?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            connector,
            issuer,
            client_id: credentials.client_id(),
            trust,
            clock,
            config,
            context: Arc::new(SessionContext::new(credentials.device_id().to_string())),
            connect_lock: Mutex::new(()),
            clock_synced: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> SessionState {
        self.context.state()
    }

    /// Latest-value view of the state.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.context.state_tx.subscribe()
    }

    /// Every transition, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<SessionState> {
        self.context.transitions.subscribe()
    }

    /// Connect attempts made so far (successful or not).
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn publisher(&self, qos: QoS) -> TelemetryPublisher<C::Session> {
        TelemetryPublisher::new(Arc::clone(&self.context), Arc::clone(&self.clock), qos)
    }

    /// Block until the clock is past the sanity threshold. Passes once;
    /// later calls return immediately.
    ///
    /// [`shutdown`](Self::shutdown) abandons the wait with `ClockSync`
    /// without faulting the session.
    pub async fn wait_for_clock_sync(&self) -> MqttResult<()> {
        if self.clock_synced.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        let outcome = tokio::select! {
            outcome = clock::wait_until_trusted(
                self.clock.as_ref(),
                self.config.clock_sync_threshold,
                self.config.clock_poll_interval(),
                self.config.clock_sync_timeout(),
            ) => outcome,
            _ = shutdown_requested(&mut shutdown) => {
                tracing::info!("shutdown requested while waiting for clock sync");
                return Err(MqttError::ClockSync(
                    "shutdown requested before the clock was trusted".into(),
                ));
            }
        };

        match outcome {
            Ok(_) => {
                self.clock_synced.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.fault(&e).await;
                Err(e)
            }
        }
    }

    /// Make a single connect attempt.
    ///
    /// Returns immediately if already connected. A `Faulted` session
    /// refuses to connect.
    pub async fn connect(&self) -> MqttResult<()> {
        let _guard = self.connect_lock.lock().await;

        match self.state() {
            SessionState::Connected => return Ok(()),
            SessionState::Faulted => {
                return Err(MqttError::Config(
                    "session is faulted; restart with corrected inputs".into(),
                ));
            }
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        self.wait_for_clock_sync().await?;

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.context.transition(SessionState::Connecting);

        match self.open_session().await {
            Ok(active) => {
                let expires_at = active.token_expires_at;
                let previous = self.context.active.lock().await.replace(active);
                if let Some(stale) = previous {
                    let _ = stale.session.disconnect().await;
                }
                self.context.transition(SessionState::Connected);
                tracing::info!(
                    client_id = %self.client_id,
                    attempt,
                    token_expires_at = %expires_at,
                    "connected"
                );
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.fault(&e).await;
                Err(e)
            }
            Err(e) => {
                self.context.transition(SessionState::Disconnected);
                tracing::warn!(attempt, error = %e, "connect attempt failed");
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> MqttResult<ActiveSession<C::Session>> {
        let started = Instant::now();
        let token = self.issuer.issue(self.clock.now())?;

        let request = ConnectRequest {
            client_id: self.client_id.clone(),
            username: UNUSED_USERNAME.to_string(),
            password: token.as_str().to_string(),
        };
        let session = self.connector.connect(&request, &self.trust).await?;

        if self.config.subscribe_device_topics {
            if let Err(e) = self.subscribe_device_topics(&session).await {
                let _ = session.disconnect().await;
                return Err(e);
            }
        }

        Ok(ActiveSession {
            session: Arc::new(session),
            token_expires_at: token.expires_at(),
            refresh_at: started + self.config.refresh_after(),
        })
    }

    async fn subscribe_device_topics(&self, session: &C::Session) -> MqttResult<()> {
        let device_id = self.context.device_id();
        session
            .subscribe(&topics::config(device_id), QoS::AtLeastOnce)
            .await?;
        session
            .subscribe(&topics::commands_subscribe(device_id), QoS::AtMostOnce)
            .await?;
        tracing::debug!(device_id = %device_id, "subscribed to config and commands");
        Ok(())
    }

    /// Connect, retrying transient failures per the backoff policy.
    ///
    /// Fatal errors return at once. When retries run out the last error is
    /// returned and the state stays `Disconnected`.
    pub async fn connect_with_retry(&self) -> MqttResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        let policy = &self.config.backoff;
        let mut failures: u32 = 0;

        loop {
            match self.connect().await {
                Ok(()) => {
                    if failures > 0 {
                        tracing::info!(attempts = failures + 1, "connected after retries");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if !policy.allows_retry_after(failures) {
                        tracing::error!(attempts = failures, error = %e, "giving up on connect");
                        return Err(e);
                    }

                    let delay = policy.delay_for(failures);
                    tracing::warn!(
                        attempt = failures,
                        max_attempts = ?policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect failed, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut shutdown) => return Err(e),
                    }
                }
            }
        }
    }

    /// Keep the session up until [`shutdown`](Self::shutdown) is called.
    ///
    /// Reconnects after session loss, recycles the session before the token
    /// expires and forwards inbound config/command messages to `incoming`.
    /// Returns `Ok` on shutdown, or the error that stopped reconnection.
    pub async fn run(&self, incoming: Option<mpsc::Sender<IncomingMessage>>) -> MqttResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                self.close().await;
                return Ok(());
            }

            if self.state() != SessionState::Connected {
                if let Err(e) = self.connect_with_retry().await {
                    if *shutdown.borrow() {
                        self.close().await;
                        return Ok(());
                    }
                    return Err(e);
                }
            }

            let current = {
                let guard = self.context.active.lock().await;
                guard
                    .as_ref()
                    .map(|active| (Arc::clone(&active.session), active.refresh_at))
            };
            let Some((session, refresh_at)) = current else {
                self.context.transition(SessionState::Disconnected);
                continue;
            };

            let outcome = tokio::select! {
                e = self.pump(session.as_ref(), incoming.as_ref()) => Supervision::Lost(e),
                _ = tokio::time::sleep_until(refresh_at) => Supervision::Refresh,
                _ = shutdown_requested(&mut shutdown) => Supervision::Shutdown,
            };

            match outcome {
                Supervision::Lost(e) => {
                    tracing::warn!(error = %e, "session lost, reconnecting");
                    if let Some(active) = self.context.take_active().await {
                        self.context.transition(SessionState::Disconnected);
                        let _ = active.session.disconnect().await;
                    }
                }
                Supervision::Refresh => {
                    tracing::info!("token nearing expiry, recycling session");
                    self.close().await;
                }
                Supervision::Shutdown => {
                    self.close().await;
                    return Ok(());
                }
            }
        }
    }

    /// Drain inbound publishes until the session fails.
    async fn pump(
        &self,
        session: &C::Session,
        incoming: Option<&mpsc::Sender<IncomingMessage>>,
    ) -> MqttError {
        loop {
            match session.recv().await {
                Ok(publish) => {
                    let message = classify(self.context.device_id(), &publish);
                    tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "inbound message");
                    if let Some(tx) = incoming {
                        if tx.send(message).await.is_err() {
                            tracing::debug!("incoming receiver dropped");
                        }
                    }
                }
                Err(e) => return e,
            }
        }
    }

    /// Gracefully close the live session, if any.
    pub async fn close(&self) {
        let Some(active) = self.context.take_active().await else {
            return;
        };
        if self.state() != SessionState::Faulted {
            self.context.transition(SessionState::Disconnected);
        }
        if let Err(e) = active.session.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed");
        }
    }

    /// Ask `run` and any pending backoff to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn fault(&self, error: &MqttError) {
        if let Some(active) = self.context.take_active().await {
            let _ = active.session.disconnect().await;
        }
        self.context.transition(SessionState::Faulted);
        tracing::error!(error = %error, "session faulted");
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
