//! Authenticated MQTT session for a cloud IoT device.
//!
//! Establishes and maintains one TLS-secured MQTT session to the device
//! bridge, authenticated with a short-lived signed token:
//! - `CredentialStore` and `TokenIssuer` for identity and ES256 tokens
//! - `TrustAnchorSet` for the CA certificates the broker must chain to
//! - `SessionManager` for the clock gate, connect, backoff, refresh and reconnect
//! - `TelemetryPublisher` for telemetry and state publishes
//! - `Connector` / `TransportSession` traits with a `rumqttc` implementation
//!   and an in-memory `mock` for tests

pub mod backoff;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod mock;
pub mod publisher;
pub mod session;
pub mod token;
pub mod transport;
pub mod trust;

// Re-exports for convenience.
pub use backoff::BackoffPolicy;
pub use clock::{Clock, SystemClock};
pub use config::{MqttConfig, SessionConfig};
pub use credentials::{CredentialStore, DeviceIdentity, IdentityFields};
pub use error::{MqttError, MqttResult};
pub use handler::{IncomingMessage, classify};
pub use publisher::{PublishRequest, TelemetryPublisher};
pub use session::{SessionContext, SessionManager, SessionState};
pub use token::{AuthToken, TokenIssuer};
pub use transport::{
    ConnectRequest, Connector, InboundPublish, RumqttConnector, RumqttSession, TransportSession,
};
pub use trust::{TrustAnchor, TrustAnchorSet};
