//! TLS-wrapped MQTT transport to the broker.
//!
//! `Connector` opens one authenticated session per call; `TransportSession`
//! is the live link. Both are traits so the session manager can be driven
//! by [`crate::mock`] in tests without a broker.

use std::fmt;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::trust::TrustAnchorSet;

/// Fields of MQTT CONNECT that vary per attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub client_id: String,
    pub username: String,
    /// The signed auth token.
    pub password: String,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<token>")
            .finish()
    }
}

/// A publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// An established, authenticated broker session.
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    /// Hand a message to the transport for delivery.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Wait for the next inbound publish. An error means the session is gone.
    async fn recv(&self) -> MqttResult<InboundPublish>;

    /// Close gracefully. Safe to call more than once.
    async fn disconnect(&self) -> MqttResult<()>;
}

/// Opens sessions against the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: TransportSession;

    /// TCP + TLS (validated against `trust`) + MQTT CONNECT/CONNACK.
    async fn connect(
        &self,
        request: &ConnectRequest,
        trust: &TrustAnchorSet,
    ) -> MqttResult<Self::Session>;
}

// ── rumqttc implementation ────────────────────────────────────

/// Production connector backed by `rumqttc`.
#[derive(Debug, Clone)]
pub struct RumqttConnector {
    config: MqttConfig,
}

impl RumqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// MQTT options for one attempt.
    pub fn options(&self, request: &ConnectRequest, trust: &TrustAnchorSet) -> MqttOptions {
        let mut options = MqttOptions::new(
            &request.client_id,
            self.config.effective_host(),
            self.config.broker_port,
        );
        options.set_keep_alive(self.config.keepalive());
        options.set_clean_session(self.config.clean_session);
        options.set_credentials(&request.username, &request.password);
        options.set_max_packet_size(self.config.max_packet_size, self.config.max_packet_size);
        trust.attach_to(&mut options);
        options
    }
}

#[async_trait]
impl Connector for RumqttConnector {
    type Session = RumqttSession;

    async fn connect(
        &self,
        request: &ConnectRequest,
        trust: &TrustAnchorSet,
    ) -> MqttResult<RumqttSession> {
        let host = self.config.effective_host();
        tracing::debug!(
            host = %host,
            port = self.config.broker_port,
            client_id = %request.client_id,
            "opening MQTT session"
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(request, trust), 64);

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => Ok(RumqttSession::spawn(
                client,
                eventloop,
                self.config.max_packet_size,
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MqttError::Connect(format!(
                "no CONNACK from {host} within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> MqttResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(MqttError::Connect(format!(
                        "broker rejected connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(MqttError::Connect(e.to_string())),
        }
    }
}

/// Size on the wire of an MQTT 3.1.1 PUBLISH: fixed header, topic, packet
/// id (QoS > 0) and payload.
pub fn publish_packet_len(topic: &str, payload_len: usize, qos: QoS) -> usize {
    let packet_id = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining = 2 + topic.len() + packet_id + payload_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

/// Live rumqttc session. The event loop runs in a dedicated task that
/// forwards inbound publishes and reports the first connection error.
pub struct RumqttSession {
    client: AsyncClient,
    max_packet_size: usize,
    inbound: Mutex<mpsc::Receiver<MqttResult<InboundPublish>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// How long `disconnect` waits for DISCONNECT to be flushed.
const DISCONNECT_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

impl RumqttSession {
    fn spawn(client: AsyncClient, mut eventloop: EventLoop, max_packet_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(32);

        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = InboundPublish {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        let _ = tx
                            .send(Err(MqttError::Transport("disconnected by client".into())))
                            .await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Polling again would make rumqttc reconnect with the
                        // stale token; the session manager owns reconnection.
                        let _ = tx.send(Err(MqttError::Transport(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Self {
            client,
            max_packet_size,
            inbound: Mutex::new(rx),
            driver: Mutex::new(Some(driver)),
        }
    }
}

#[async_trait]
impl TransportSession for RumqttSession {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        // rumqttc only enqueues here; an oversized packet would fail later in
        // the event loop and take the session down with it.
        let size = publish_packet_len(topic, payload.len(), qos);
        if size > self.max_packet_size {
            return Err(MqttError::PacketTooLarge {
                size,
                max: self.max_packet_size,
            });
        }

        self.client
            .publish(topic, qos, false, payload.to_vec())
            .await
            .map_err(|e| MqttError::Transport(format!("publish to {topic}: {e}")))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Transport(format!("subscribe to {filter}: {e}")))
    }

    async fn recv(&self) -> MqttResult<InboundPublish> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(MqttError::Transport("event loop stopped".into())))
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let Some(mut driver) = self.driver.lock().await.take() else {
            return Ok(());
        };

        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| MqttError::Transport(e.to_string()));

        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
            .await
            .is_err()
        {
            driver.abort();
        }
        result
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.try_lock() {
            if let Some(handle) = driver.take() {
                handle.abort();
            }
        }
    }
}
