//! MQTT topic builders and parsers for the device topic hierarchy.
//!
//! Topic structure:
//! ```text
//! /devices/{device_id}/events
//! /devices/{device_id}/events/{subfolder}
//! /devices/{device_id}/state
//! /devices/{device_id}/config
//! /devices/{device_id}/commands
//! /devices/{device_id}/commands/{subfolder}
//! ```

const PREFIX: &str = "/devices";

// ─── Outbound topics ───

/// Base telemetry topic for a device.
pub fn telemetry(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/events")
}

/// Telemetry topic with an optional subfolder suffix.
///
/// An empty or slash-only subfolder maps to the base telemetry topic.
pub fn telemetry_in(device_id: &str, subfolder: Option<&str>) -> String {
    match subfolder.map(|s| s.trim_matches('/')) {
        Some(sub) if !sub.is_empty() => format!("{PREFIX}/{device_id}/events/{sub}"),
        _ => telemetry(device_id),
    }
}

pub fn state(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/state")
}

// ─── Inbound topics ───

pub fn config(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/config")
}

pub fn commands(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/commands")
}

/// Wildcard filter covering every command subfolder for a device.
pub fn commands_subscribe(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/commands/#")
}

// ─── Topic parsing ───

/// Parsed MQTT topic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: String,
    /// `events`, `state`, `config` or `commands`.
    pub category: String,
    /// Remaining path after the category, if any (`a/b` for `.../commands/a/b`).
    pub subfolder: Option<String>,
}

/// Parse a topic string into its components.
/// Returns `None` if the topic doesn't match the expected format.
pub fn parse_topic(topic: &str) -> Option<ParsedTopic> {
    let rest = topic.strip_prefix(PREFIX)?.strip_prefix('/')?;
    let mut parts = rest.splitn(3, '/');

    let device_id = parts.next().filter(|s| !s.is_empty())?;
    let category = parts.next().filter(|s| !s.is_empty())?;
    let subfolder = parts.next().filter(|s| !s.is_empty()).map(str::to_string);

    Some(ParsedTopic {
        device_id: device_id.to_string(),
        category: category.to_string(),
        subfolder,
    })
}
