use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use ciot_protocol::device::{DEFAULT_BROKER_HOST, LTS_BROKER_HOST};

use crate::backoff::BackoffPolicy;
use crate::error::{MqttError, MqttResult};

/// MQTT connection configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT bridge hostname.
    #[serde(default = "default_host")]
    pub broker_host: String,
    /// MQTT broker port (8883 for TLS).
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Use the long-term-support endpoint when `broker_host` is left at its default.
    #[serde(default)]
    pub use_lts: bool,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Time allowed for TCP + TLS + CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Max incoming/outgoing MQTT packet size in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// QoS for telemetry and state publishes (0 or 1).
    #[serde(default = "default_telemetry_qos")]
    pub telemetry_qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: default_host(),
            broker_port: default_port(),
            use_lts: false,
            keepalive_secs: default_keepalive(),
            clean_session: default_clean_session(),
            connect_timeout_ms: default_connect_timeout(),
            max_packet_size: default_max_packet_size(),
            telemetry_qos: default_telemetry_qos(),
        }
    }
}

impl MqttConfig {
    /// Hostname actually dialled, taking `use_lts` into account.
    pub fn effective_host(&self) -> &str {
        if self.use_lts && self.broker_host == DEFAULT_BROKER_HOST {
            LTS_BROKER_HOST
        } else {
            &self.broker_host
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.into())
    }

    /// Telemetry QoS. QoS 2 is not accepted by the bridge.
    pub fn qos(&self) -> MqttResult<QoS> {
        match self.telemetry_qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(MqttError::Config(format!(
                "telemetry_qos must be 0 or 1, got {other}"
            ))),
        }
    }
}

fn default_host() -> String {
    DEFAULT_BROKER_HOST.to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> u16 {
    180
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_max_packet_size() -> usize {
    8 * 1024
}

fn default_telemetry_qos() -> u8 {
    1
}

/// Lifecycle policy for the session manager.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of each issued token.
    #[serde(default = "default_jwt_validity")]
    pub jwt_validity_secs: u64,
    /// Force a reconnect this long before the token expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    /// Wall-clock reading (unix seconds) below which the clock is untrusted.
    #[serde(default = "default_clock_threshold")]
    pub clock_sync_threshold: i64,
    #[serde(default = "default_clock_poll")]
    pub clock_poll_interval_ms: u64,
    /// Give up waiting for the clock after this long. `0` waits forever.
    #[serde(default = "default_clock_timeout")]
    pub clock_sync_timeout_secs: Option<u64>,
    /// Subscribe to the device config and commands topics after connecting.
    #[serde(default = "default_subscribe")]
    pub subscribe_device_topics: bool,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_validity_secs: default_jwt_validity(),
            refresh_margin_secs: default_refresh_margin(),
            clock_sync_threshold: default_clock_threshold(),
            clock_poll_interval_ms: default_clock_poll(),
            clock_sync_timeout_secs: default_clock_timeout(),
            subscribe_device_topics: default_subscribe(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Lower bound on clock polling so the gate never spins.
const MIN_CLOCK_POLL_MS: u64 = 10;

impl SessionConfig {
    /// Reject policies that would allow a publish under an expired token.
    pub fn validate(&self) -> MqttResult<()> {
        if self.jwt_validity_secs == 0 {
            return Err(MqttError::Config("jwt_validity_secs must be > 0".into()));
        }
        if self.refresh_margin_secs == 0 || self.refresh_margin_secs >= self.jwt_validity_secs {
            return Err(MqttError::Config(format!(
                "refresh_margin_secs ({}) must be in 1..{} so reconnects precede token expiry",
                self.refresh_margin_secs, self.jwt_validity_secs
            )));
        }
        self.backoff.validate()
    }

    pub fn jwt_validity(&self) -> Duration {
        Duration::from_secs(self.jwt_validity_secs)
    }

    /// Interval after which an established session is recycled.
    pub fn refresh_after(&self) -> Duration {
        Duration::from_secs(self.jwt_validity_secs.saturating_sub(self.refresh_margin_secs))
    }

    pub fn clock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clock_poll_interval_ms.max(MIN_CLOCK_POLL_MS))
    }

    pub fn clock_sync_timeout(&self) -> Option<Duration> {
        self.clock_sync_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_jwt_validity() -> u64 {
    3600
}

fn default_refresh_margin() -> u64 {
    300
}

fn default_clock_threshold() -> i64 {
    // 2017-11-14T07:36:07Z
    1_510_644_967
}

fn default_clock_poll() -> u64 {
    500
}

fn default_clock_timeout() -> Option<u64> {
    Some(3600)
}

fn default_subscribe() -> bool {
    true
}
