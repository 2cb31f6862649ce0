//! Cloud IoT device agent: keeps an authenticated MQTT session to the
//! device bridge and publishes periodic telemetry over it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ciot_device_agent::config::AgentConfig;
use ciot_device_agent::{incoming, telemetry};
use ciot_mqtt_session::{RumqttConnector, SessionManager, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "ciot-device-agent starting"
    );

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/ciot/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    let credentials = config.load_credentials()?;
    let trust = config.load_trust_store()?;
    let qos = config.mqtt.qos()?;
    tracing::info!(
        client_id = %credentials.client_id(),
        host = %config.mqtt.effective_host(),
        anchors = trust.len(),
        "config loaded"
    );
    if !config.ntp_servers.is_empty() {
        tracing::info!(
            ntp_servers = ?config.ntp_servers,
            "relying on host time sync before issuing tokens"
        );
    }

    // ── Session ─────────────────────────────────────────────────
    let manager = SessionManager::new(
        RumqttConnector::new(config.mqtt.clone()),
        &credentials,
        trust,
        Arc::new(SystemClock),
        config.session.clone(),
    )?;
    let publisher = manager.publisher(qos);
    let (incoming_tx, incoming_rx) = mpsc::channel(32);

    let start_time = tokio::time::Instant::now();

    tracing::info!("ciot-device-agent ready");

    let outcome = tokio::select! {
        // Connect, supervise, refresh and reconnect
        result = manager.run(Some(incoming_tx)) => result,
        // Publish periodic telemetry
        () = telemetry::run(
            &publisher,
            config.telemetry_interval(),
            config.telemetry_subfolder.as_deref(),
            start_time,
        ) => {
            tracing::error!("telemetry loop exited unexpectedly");
            Ok(())
        }
        // Log config and commands from the cloud
        handled = incoming::run(incoming_rx) => {
            tracing::debug!(handled, "incoming dispatcher stopped");
            Ok(())
        }
        // Graceful shutdown on SIGINT
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    manager.shutdown();
    manager.close().await;

    if let Err(e) = outcome {
        tracing::error!(error = %e, state = %manager.state(), "session stopped");
        return Err(e.into());
    }

    tracing::info!("ciot-device-agent stopped");
    Ok(())
}
