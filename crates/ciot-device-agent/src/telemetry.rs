//! Periodic telemetry publisher.
//!
//! Sends a `TelemetrySample` at a configurable interval. Samples taken while
//! the session is down are dropped, not queued.

use std::time::Duration;

use chrono::Utc;
use tokio::time;

use ciot_mqtt_session::{MqttError, TelemetryPublisher, TransportSession};
use ciot_protocol::telemetry::TelemetrySample;

/// Build the sample for tick number `sequence`.
pub fn sample(device_id: &str, sequence: u64, start_time: time::Instant) -> TelemetrySample {
    TelemetrySample {
        device_id: device_id.to_string(),
        sequence,
        uptime_secs: start_time.elapsed().as_secs(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    }
}

/// Run the telemetry loop, publishing at `interval`.
///
/// Runs until cancelled.
pub async fn run<S: TransportSession>(
    publisher: &TelemetryPublisher<S>,
    interval: Duration,
    subfolder: Option<&str>,
    start_time: time::Instant,
) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    let mut sequence: u64 = 0;
    loop {
        ticker.tick().await;
        sequence += 1;

        let sample = sample(publisher.device_id(), sequence, start_time);
        match publisher.publish_json(subfolder, &sample).await {
            Ok(()) => tracing::debug!(sequence, uptime_secs = sample.uptime_secs, "telemetry sent"),
            Err(MqttError::NotConnected(state)) => {
                tracing::debug!(sequence, state = %state, "session not connected, telemetry skipped");
            }
            Err(e) => tracing::warn!(sequence, error = %e, "failed to publish telemetry"),
        }
    }
}
