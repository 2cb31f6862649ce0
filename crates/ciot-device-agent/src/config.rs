//! Device agent configuration, loadable from TOML.

use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use ciot_mqtt_session::{CredentialStore, IdentityFields, MqttConfig, SessionConfig, TrustAnchorSet};

/// Top-level configuration for the device agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Device identity. `private_key` may be given inline or via `private_key_path`.
    #[serde(default)]
    pub device: IdentityFields,
    /// File holding the device private key.
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// CA certificate files, primary first.
    #[serde(default)]
    pub ca_cert_paths: Vec<String>,
    /// Time servers the host is expected to sync against. Reported only.
    #[serde(default)]
    pub ntp_servers: Vec<String>,
    /// Telemetry interval in seconds.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,
    #[serde(default)]
    pub telemetry_subfolder: Option<String>,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_telemetry_interval() -> u64 {
    60
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing config {path}"))?;
        Ok(config)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs.max(1))
    }

    /// Build the credential store, reading the key file if configured.
    pub fn load_credentials(&self) -> anyhow::Result<CredentialStore> {
        let mut fields = self.device.clone();

        if let Some(path) = &self.private_key_path {
            if fields.private_key.is_some() {
                bail!("set either device.private_key or private_key_path, not both");
            }
            let key = std::fs::read_to_string(path)
                .with_context(|| format!("reading private key {path}"))?;
            fields.private_key = Some(key);
        }

        Ok(CredentialStore::load(fields)?)
    }

    /// Read every CA file, in order, into a trust set.
    pub fn load_trust_store(&self) -> anyhow::Result<TrustAnchorSet> {
        let blobs = self
            .ca_cert_paths
            .iter()
            .map(|path| std::fs::read(path).with_context(|| format!("reading CA file {path}")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(TrustAnchorSet::build(blobs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciot_mqtt_session::{MqttError, mock};
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ciot-agent-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn deserialize_minimal_config() {
        let toml = r#"
ca_cert_paths = ["/etc/ciot/roots.pem"]
private_key_path = "/etc/ciot/ec_private.pem"

[device]
project_id = "p1"
registry_id = "r1"
device_id = "d1"
"#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.device.device_id.as_deref(), Some("d1"));
        assert_eq!(config.telemetry_interval_secs, 60); // default
        assert_eq!(config.mqtt.broker_host, "mqtt.googleapis.com");
        assert_eq!(config.session.jwt_validity_secs, 3600);
        assert!(config.ntp_servers.is_empty());
        assert!(config.telemetry_subfolder.is_none());
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
ca_cert_paths = ["/certs/primary.pem", "/certs/backup.pem"]
ntp_servers = ["pool.ntp.org", "time.nist.gov"]
telemetry_interval_secs = 15
telemetry_subfolder = "agent"

[device]
project_id = "p1"
location = "europe-west1"
registry_id = "r1"
device_id = "d1"
private_key = "5a:2e:06"

[mqtt]
use_lts = true
keepalive_secs = 60
telemetry_qos = 0

[session]
jwt_validity_secs = 1200
refresh_margin_secs = 60

[session.backoff]
max_attempts = 10
"#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.ca_cert_paths.len(), 2);
        assert_eq!(config.ntp_servers, vec!["pool.ntp.org", "time.nist.gov"]);
        assert_eq!(config.telemetry_interval(), Duration::from_secs(15));
        assert_eq!(config.telemetry_subfolder.as_deref(), Some("agent"));
        assert_eq!(config.mqtt.effective_host(), "mqtt.2030.ltsapis.goog");
        assert_eq!(config.mqtt.keepalive_secs, 60);
        assert_eq!(config.session.backoff.max_attempts, Some(10));
        assert!(config.session.validate().is_ok());
    }

    #[test]
    fn key_file_is_read_into_identity() {
        let key_path = scratch_file("key.pem", mock::sample_private_key_pem().as_bytes());
        let config: AgentConfig = toml::from_str(&format!(
            r#"
private_key_path = "{}"

[device]
project_id = "p1"
registry_id = "r1"
device_id = "d1"
"#,
            key_path.display()
        ))
        .unwrap();

        let store = config.load_credentials().unwrap();
        assert_eq!(
            store.client_id(),
            "projects/p1/locations/us-central1/registries/r1/devices/d1"
        );
        std::fs::remove_file(key_path).ok();
    }

    #[test]
    fn inline_and_file_key_conflict() {
        let config: AgentConfig = toml::from_str(
            r#"
private_key_path = "/nonexistent"

[device]
project_id = "p1"
registry_id = "r1"
device_id = "d1"
private_key = "5a:2e"
"#,
        )
        .unwrap();
        assert!(config.load_credentials().is_err());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config: AgentConfig = toml::from_str(
            r#"
[device]
project_id = "p1"
registry_id = "r1"
device_id = "d1"
"#,
        )
        .unwrap();
        let err = config.load_credentials().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MqttError>(),
            Some(MqttError::Config(_))
        ));
    }

    #[test]
    fn trust_store_reads_files_in_order() {
        let primary = scratch_file("primary.pem", &mock::sample_anchor_pem(1));
        let backup = scratch_file("backup.pem", &mock::sample_anchor_pem(2));
        let config = AgentConfig {
            ca_cert_paths: vec![
                primary.display().to_string(),
                backup.display().to_string(),
            ],
            ..toml::from_str("").unwrap()
        };

        let trust = config.load_trust_store().unwrap();
        assert_eq!(trust.len(), 2);
        assert_eq!(trust.anchors()[1].der(), mock::sample_anchor_der(2).as_slice());

        std::fs::remove_file(primary).ok();
        std::fs::remove_file(backup).ok();
    }

    #[test]
    fn empty_trust_store_is_rejected() {
        let config: AgentConfig = toml::from_str("").unwrap();
        let err = config.load_trust_store().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MqttError>(),
            Some(MqttError::Trust(_))
        ));
    }
}
