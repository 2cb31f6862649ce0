//! Device naming conventions shared by the session core and the agent.

/// Username sent in MQTT CONNECT. The broker ignores it; auth rides on the password.
pub const UNUSED_USERNAME: &str = "unused";

/// Default MQTT bridge endpoint.
pub const DEFAULT_BROKER_HOST: &str = "mqtt.googleapis.com";

/// Long-term-support MQTT endpoint.
pub const LTS_BROKER_HOST: &str = "mqtt.2030.ltsapis.goog";

/// Default location when the settings source omits it.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Build the full device path used as the MQTT client identifier.
pub fn client_id(project_id: &str, location: &str, registry_id: &str, device_id: &str) -> String {
    format!("projects/{project_id}/locations/{location}/registries/{registry_id}/devices/{device_id}")
}
