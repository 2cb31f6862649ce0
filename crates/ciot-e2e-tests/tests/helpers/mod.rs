//! Shared test harness for E2E integration tests.
//!
//! Wires a real `SessionManager` to the in-memory `MockBroker` and a
//! settable `MockClock`, exercising every layer except the network.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;

use ciot_mqtt_session::mock::{self, MockBroker, MockClock, MockConnector};
use ciot_mqtt_session::{
    BackoffPolicy, CredentialStore, SessionConfig, SessionManager, SessionState, TrustAnchorSet,
};

/// A wall-clock instant well past the sanity threshold.
pub fn synced_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// A wall-clock instant before the sanity threshold (unset RTC).
pub fn unsynced_time() -> DateTime<Utc> {
    Utc.timestamp_opt(86_400, 0).unwrap()
}

/// Fast backoff so retry scenarios stay short under paused time.
pub fn fast_session_config() -> SessionConfig {
    SessionConfig {
        backoff: BackoffPolicy {
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            min_delay_ms: 50,
            max_attempts: None,
        },
        ..SessionConfig::default()
    }
}

/// End-to-end harness: one device session against a mock broker.
pub struct TestHarness {
    pub broker: Arc<MockBroker>,
    pub clock: Arc<MockClock>,
    pub manager: Arc<SessionManager<MockConnector>>,
    /// Subscribed before any activity so no transition is missed.
    pub transitions: broadcast::Receiver<SessionState>,
}

impl TestHarness {
    /// Device `p1/us-central1/r1/d1`, synced clock, one trust anchor.
    pub fn new() -> Self {
        Self::build(
            mock::sample_credentials(),
            mock::sample_trust(),
            synced_time(),
            fast_session_config(),
        )
    }

    pub fn with_clock(now: DateTime<Utc>) -> Self {
        Self::build(
            mock::sample_credentials(),
            mock::sample_trust(),
            now,
            fast_session_config(),
        )
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::build(
            mock::sample_credentials(),
            mock::sample_trust(),
            synced_time(),
            config,
        )
    }

    pub fn build(
        credentials: CredentialStore,
        trust: TrustAnchorSet,
        now: DateTime<Utc>,
        config: SessionConfig,
    ) -> Self {
        let broker = MockBroker::new();
        let clock = Arc::new(MockClock::at(now));
        let manager = SessionManager::new(
            broker.connector(),
            &credentials,
            trust,
            clock.clone(),
            config,
        )
        .unwrap();
        let transitions = manager.subscribe_transitions();

        Self {
            broker,
            clock,
            manager: Arc::new(manager),
            transitions,
        }
    }

    /// Spawn `SessionManager::run` in the background.
    pub fn spawn_run(&self) -> tokio::task::JoinHandle<ciot_mqtt_session::MqttResult<()>> {
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move { manager.run(None).await })
    }

    /// Collect transitions up to and including `target`.
    pub async fn transitions_until(&mut self, target: SessionState) -> Vec<SessionState> {
        let mut seen = Vec::new();
        loop {
            let state = self.transitions.recv().await.unwrap();
            seen.push(state);
            if state == target {
                return seen;
            }
        }
    }

    /// Transitions already emitted, without waiting.
    pub fn drain_transitions(&mut self) -> Vec<SessionState> {
        let mut seen = Vec::new();
        while let Ok(state) = self.transitions.try_recv() {
            seen.push(state);
        }
        seen
    }
}
