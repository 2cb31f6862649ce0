//! Telemetry and state publishing over the managed session.

use std::sync::Arc;

use rumqttc::QoS;
use serde::Serialize;

use ciot_protocol::topics;

use crate::clock::Clock;
use crate::error::{MqttError, MqttResult};
use crate::session::{SessionContext, SessionState};
use crate::transport::TransportSession;

/// One telemetry message: payload plus optional subfolder under the
/// device's events topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic_suffix: Option<String>,
    pub payload: Vec<u8>,
}

impl PublishRequest {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic_suffix: None,
            payload: payload.into(),
        }
    }

    pub fn in_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.topic_suffix = Some(subfolder.into());
        self
    }
}

/// Publishes on the live session owned by a `SessionManager`.
///
/// Cheap to clone. Publishes are serialized; each one either reaches the
/// transport or fails without side effects.
pub struct TelemetryPublisher<S> {
    context: Arc<SessionContext<S>>,
    clock: Arc<dyn Clock>,
    qos: QoS,
}

impl<S> Clone for TelemetryPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            clock: Arc::clone(&self.clock),
            qos: self.qos,
        }
    }
}

impl<S: TransportSession> TelemetryPublisher<S> {
    pub(crate) fn new(context: Arc<SessionContext<S>>, clock: Arc<dyn Clock>, qos: QoS) -> Self {
        Self {
            context,
            clock,
            qos,
        }
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn device_id(&self) -> &str {
        self.context.device_id()
    }

    /// Publish to `/devices/{id}/events[/{suffix}]`.
    pub async fn publish(&self, request: PublishRequest) -> MqttResult<()> {
        let topic = topics::telemetry_in(self.context.device_id(), request.topic_suffix.as_deref());
        self.send(&topic, &request.payload).await
    }

    /// Serialize `value` as JSON and publish it as telemetry.
    pub async fn publish_json<T: Serialize>(
        &self,
        subfolder: Option<&str>,
        value: &T,
    ) -> MqttResult<()> {
        let payload =
            serde_json::to_vec(value).map_err(|e| MqttError::Serialization(e.to_string()))?;
        let topic = topics::telemetry_in(self.context.device_id(), subfolder);
        self.send(&topic, &payload).await
    }

    /// Publish to `/devices/{id}/state`.
    pub async fn publish_state(&self, payload: impl AsRef<[u8]>) -> MqttResult<()> {
        let topic = topics::state(self.context.device_id());
        self.send(&topic, payload.as_ref()).await
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> MqttResult<()> {
        let state = self.context.state();
        if state != SessionState::Connected {
            return Err(MqttError::NotConnected(state));
        }

        // Held across the publish so concurrent callers are serialized and
        // the session cannot be swapped out mid-send.
        let guard = self.context.active.lock().await;
        let Some(active) = guard.as_ref() else {
            return Err(MqttError::NotConnected(self.context.state()));
        };

        if self.clock.now() >= active.token_expires_at {
            return Err(MqttError::TokenExpired(active.token_expires_at));
        }

        active.session.publish(topic, payload, self.qos).await?;
        tracing::debug!(topic, bytes = payload.len(), qos = ?self.qos, "published");
        Ok(())
    }
}
