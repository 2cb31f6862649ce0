//! In-memory broker, connector, clock and key fixtures for tests.
//!
//! `MockBroker` records every connect attempt, publish, subscription and
//! disconnect, and lets tests script connect failures, drop the live
//! session or deliver inbound messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use p256::SecretKey;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::time::Instant;

use ciot_protocol::claims::TokenClaims;

use crate::clock::Clock;
use crate::credentials::{CredentialStore, IdentityFields};
use crate::error::{MqttError, MqttResult};
use crate::transport::{ConnectRequest, Connector, InboundPublish, TransportSession};
use crate::trust::TrustAnchorSet;

/// A recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// A recorded connect call.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Number of trust anchors offered for the handshake.
    pub anchors: usize,
}

type InboundSender = mpsc::UnboundedSender<MqttResult<InboundPublish>>;

#[derive(Default)]
struct BrokerState {
    attempts: Vec<ConnectAttempt>,
    scripted_failures: VecDeque<MqttError>,
    published: Vec<PublishedMessage>,
    subscriptions: Vec<(String, QoS)>,
    disconnects: usize,
    live: Option<(u64, InboundSender)>,
    next_session: u64,
}

/// Fake broker shared by a `MockConnector` and the sessions it opens.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> MockConnector {
        MockConnector {
            broker: Arc::clone(self),
        }
    }

    /// The next connects fail with these errors, in order.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = MqttError>) {
        self.state
            .lock()
            .unwrap()
            .scripted_failures
            .extend(errors);
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.state.lock().unwrap().published.last().cloned()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .any(|(f, _)| f == filter)
    }

    /// Graceful disconnects received from clients.
    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().live.is_some()
    }

    /// Kill the live session as a network failure would.
    /// Returns false if nothing was connected.
    pub fn drop_connection(&self) -> bool {
        let Some((_, tx)) = self.state.lock().unwrap().live.take() else {
            return false;
        };
        let _ = tx.send(Err(MqttError::Transport("connection reset by peer".into())));
        true
    }

    /// Deliver a publish to the live session.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let state = self.state.lock().unwrap();
        let Some((_, tx)) = state.live.as_ref() else {
            return false;
        };
        tx.send(Ok(InboundPublish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }))
        .is_ok()
    }

    /// Forget recorded publishes, subscriptions and attempts.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.attempts.clear();
        state.published.clear();
        state.subscriptions.clear();
        state.disconnects = 0;
    }

    fn is_live(&self, session: u64) -> bool {
        matches!(self.state.lock().unwrap().live, Some((id, _)) if id == session)
    }
}

/// Connector that opens sessions on a `MockBroker`.
#[derive(Clone)]
pub struct MockConnector {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(
        &self,
        request: &ConnectRequest,
        trust: &TrustAnchorSet,
    ) -> MqttResult<MockSession> {
        let mut state = self.broker.state.lock().unwrap();
        state.attempts.push(ConnectAttempt {
            client_id: request.client_id.clone(),
            username: request.username.clone(),
            password: request.password.clone(),
            anchors: trust.len(),
        });

        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_session += 1;
        let id = state.next_session;
        state.live = Some((id, tx));

        Ok(MockSession {
            broker: Arc::clone(&self.broker),
            id,
            inbound: tokio::sync::Mutex::new(rx),
        })
    }
}

/// Session on a `MockBroker`. Fails once the broker drops it.
pub struct MockSession {
    broker: Arc<MockBroker>,
    id: u64,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<MqttResult<InboundPublish>>>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if !self.broker.is_live(self.id) {
            return Err(MqttError::Transport("session closed".into()));
        }
        self.broker
            .state
            .lock()
            .unwrap()
            .published
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
            });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        if !self.broker.is_live(self.id) {
            return Err(MqttError::Transport("session closed".into()));
        }
        self.broker
            .state
            .lock()
            .unwrap()
            .subscriptions
            .push((filter.to_string(), qos));
        Ok(())
    }

    async fn recv(&self) -> MqttResult<InboundPublish> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(MqttError::Transport("session closed".into())))
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let mut state = self.broker.state.lock().unwrap();
        state.disconnects += 1;
        if matches!(state.live, Some((id, _)) if id == self.id) {
            state.live = None;
        }
        Ok(())
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Settable clock that advances with tokio time, so paused-time tests
/// see wall-clock time move with `tokio::time::advance`.
pub struct MockClock {
    base: Mutex<(DateTime<Utc>, Instant)>,
}

impl MockClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            base: Mutex::new((now, Instant::now())),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.base.lock().unwrap() = (now, Instant::now());
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let (base, since) = *self.base.lock().unwrap();
        let elapsed = chrono::Duration::from_std(since.elapsed()).unwrap();
        base + elapsed
    }
}

// ── Fixtures ──────────────────────────────────────────────────

const SAMPLE_SCALAR: [u8; 32] = [
    0x5a, 0x2e, 0x06, 0x11, 0x9c, 0x3b, 0x7d, 0x40, 0x18, 0xe2, 0x6f, 0x91, 0x0a, 0xc4, 0x53,
    0x27, 0xbe, 0x74, 0x39, 0xd8, 0x02, 0x6a, 0xf5, 0x1c, 0x83, 0x4d, 0xa0, 0x67, 0x2b, 0xe9,
    0x15, 0xc7,
];

fn sample_secret() -> SecretKey {
    SecretKey::from_slice(&SAMPLE_SCALAR).unwrap()
}

pub fn sample_signing_key() -> SigningKey {
    SigningKey::from(sample_secret())
}

/// The sample key as PKCS#8 PEM.
pub fn sample_private_key_pem() -> String {
    sample_secret()
        .to_pkcs8_pem(LineEnding::LF)
        .unwrap()
        .as_str()
        .to_owned()
}

/// The sample key as SEC1 (`EC PRIVATE KEY`) PEM.
pub fn sample_private_key_sec1_pem() -> String {
    sample_secret()
        .to_sec1_pem(LineEnding::LF)
        .unwrap()
        .as_str()
        .to_owned()
}

/// The sample key as colon-separated hex, wrapped like `openssl ec -text`.
pub fn sample_private_key_hex() -> String {
    let bytes: Vec<String> = SAMPLE_SCALAR.iter().map(|b| format!("{b:02x}")).collect();
    bytes
        .chunks(15)
        .map(|line| line.join(":"))
        .collect::<Vec<_>>()
        .join(":\n    ")
}

pub fn credentials_with_key(private_key: &str) -> CredentialStore {
    CredentialStore::load(IdentityFields {
        project_id: Some("p1".into()),
        location: Some("us-central1".into()),
        registry_id: Some("r1".into()),
        device_id: Some("d1".into()),
        private_key: Some(private_key.to_string()),
    })
    .unwrap()
}

/// Identity `p1/us-central1/r1/d1` with the sample key.
pub fn sample_credentials() -> CredentialStore {
    credentials_with_key(&sample_private_key_pem())
}

/// Minimal certificate-shaped DER:
/// `SEQUENCE { SEQUENCE { INTEGER serial }, SEQUENCE { OID ecdsa-with-SHA256 }, BIT STRING }`.
pub fn sample_anchor_der(serial: u8) -> Vec<u8> {
    let tbs = [0x30, 0x03, 0x02, 0x01, serial];
    let alg = [
        0x30, 0x0a, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02,
    ];
    let sig = [0x03, 0x01, 0x00];

    let mut der = vec![0x30, (tbs.len() + alg.len() + sig.len()) as u8];
    der.extend_from_slice(&tbs);
    der.extend_from_slice(&alg);
    der.extend_from_slice(&sig);
    der
}

pub fn sample_anchor_pem(serial: u8) -> Vec<u8> {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        STANDARD.encode(sample_anchor_der(serial))
    )
    .into_bytes()
}

/// A one-anchor trust set.
pub fn sample_trust() -> TrustAnchorSet {
    TrustAnchorSet::build([sample_anchor_pem(1)]).unwrap()
}

/// Claims segment of a compact token.
pub fn decode_claims(token: &str) -> TokenClaims {
    let segment = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}
