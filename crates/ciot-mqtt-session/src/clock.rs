//! Wall-clock access and the clock-sync gate.
//!
//! Tokens carry absolute timestamps, so nothing may be signed until the
//! local clock has been set by NTP (or the platform's equivalent).

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{MqttError, MqttResult};

/// Source of wall-clock time. Object-safe so it can be shared as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Warn once every this many unsuccessful polls.
const WARN_EVERY_POLLS: u64 = 20;

/// Block until `clock` reads at or after `threshold` (unix seconds).
///
/// Sleeps `poll` between reads. With `timeout` set, gives up with
/// `ClockSync` once that much time has elapsed.
pub async fn wait_until_trusted(
    clock: &dyn Clock,
    threshold: i64,
    poll: Duration,
    timeout: Option<Duration>,
) -> MqttResult<DateTime<Utc>> {
    let started = tokio::time::Instant::now();
    let mut polls: u64 = 0;

    loop {
        let now = clock.now();
        if now.timestamp() >= threshold {
            if polls > 0 {
                tracing::info!(
                    now = %now,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "clock synchronized"
                );
            }
            return Ok(now);
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(MqttError::ClockSync(format!(
                    "clock still reads {now} after {}s (threshold {threshold})",
                    limit.as_secs()
                )));
            }
        }

        if polls % WARN_EVERY_POLLS == 0 {
            tracing::warn!(
                now = %now,
                threshold,
                "waiting on time sync before signing tokens"
            );
        }
        polls += 1;
        tokio::time::sleep(poll).await;
    }
}
