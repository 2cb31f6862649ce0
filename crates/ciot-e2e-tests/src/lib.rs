//! End-to-end scenarios for the device link live under `tests/`.
//!
//! They drive `SessionManager`, `TelemetryPublisher` and the agent loops
//! against the in-memory broker and clock from `ciot_mqtt_session::mock`.
