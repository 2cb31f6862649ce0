use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Periodic telemetry sample emitted by the device agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: String,
    /// Monotonic per-process counter; restarts at 1 on boot.
    pub sequence: u64,
    pub uptime_secs: u64,
    /// Agent crate version.
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_serializes_expected_fields() {
        let sample = TelemetrySample {
            device_id: "d1".into(),
            sequence: 3,
            uptime_secs: 120,
            agent_version: "0.1.0".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["device_id"], "d1");
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["uptime_secs"], 120);
        assert!(value["timestamp"].is_string());
    }
}
