//! Dispatcher for config and command messages from the cloud.

use tokio::sync::mpsc;

use ciot_mqtt_session::IncomingMessage;

/// Handle messages until the session side drops its sender.
/// Returns the number of messages handled.
pub async fn run(mut rx: mpsc::Receiver<IncomingMessage>) -> u64 {
    let mut handled = 0;
    while let Some(message) = rx.recv().await {
        handle(&message);
        handled += 1;
    }
    handled
}

fn handle(message: &IncomingMessage) {
    match message {
        IncomingMessage::Config(payload) => {
            tracing::info!(
                bytes = payload.len(),
                payload = %String::from_utf8_lossy(payload),
                "config received"
            );
        }
        IncomingMessage::Command { subfolder, payload } => {
            tracing::info!(
                subfolder = subfolder.as_deref().unwrap_or(""),
                bytes = payload.len(),
                payload = %String::from_utf8_lossy(payload),
                "command received"
            );
        }
        IncomingMessage::Unknown { topic, payload } => {
            tracing::debug!(topic = %topic, bytes = payload.len(), "ignoring message");
        }
    }
}
