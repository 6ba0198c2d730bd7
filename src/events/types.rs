//! Event stream message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Listener key that receives every event
pub const ANY_EVENT: &str = "*";

/// Category fired for every incident lifecycle event
pub const INCIDENT_UPDATE: &str = "incident_update";

/// Named server-to-client event types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionEstablished,
    IncidentCreated,
    IncidentUpdated,
    IncidentResolved,
    IncidentEscalated,
    SystemStatus,
    SiteHealth,
    Heartbeat,
    /// Anything the client does not know by name
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "connection_established" | "connected" => Self::ConnectionEstablished,
            "incident_created" => Self::IncidentCreated,
            "incident_updated" => Self::IncidentUpdated,
            "incident_resolved" => Self::IncidentResolved,
            "incident_escalated" => Self::IncidentEscalated,
            "system_status" => Self::SystemStatus,
            "site_health" => Self::SiteHealth,
            "heartbeat" | "ping" => Self::Heartbeat,
            other => Self::Other(other.to_string()),
        }
    }

    /// Listener key for this event
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::IncidentCreated => "incident_created",
            Self::IncidentUpdated => "incident_updated",
            Self::IncidentResolved => "incident_resolved",
            Self::IncidentEscalated => "incident_escalated",
            Self::SystemStatus => "system_status",
            Self::SiteHealth => "site_health",
            Self::Heartbeat => "heartbeat",
            Self::Other(name) => name,
        }
    }

    /// Generalized category that also receives this event
    pub fn category(&self) -> Option<&'static str> {
        match self {
            Self::IncidentCreated
            | Self::IncidentUpdated
            | Self::IncidentResolved
            | Self::IncidentEscalated => Some(INCIDENT_UPDATE),
            _ => None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw frame as delivered by a transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// SSE `event:` field; empty means the default `message` type
    pub event: String,
    pub data: String,
    pub id: String,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: String::new(),
        }
    }
}

/// Decoded event handed to listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON payload; non-JSON data is kept as a string
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl StreamEvent {
    /// Decode a raw frame.
    ///
    /// Frames without an SSE event name may carry it in a `type` field of
    /// the JSON payload.
    pub fn from_raw(raw: RawEvent) -> Self {
        let data = serde_json::from_str::<Value>(&raw.data)
            .unwrap_or_else(|_| Value::String(raw.data.clone()));

        let event_type = if raw.event.is_empty() || raw.event == "message" {
            data.get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "message".to_string())
        } else {
            raw.event
        };

        Self {
            event_type,
            data,
            id: if raw.id.is_empty() { None } else { Some(raw.id) },
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_events_share_category() {
        for name in [
            "incident_created",
            "incident_updated",
            "incident_resolved",
            "incident_escalated",
        ] {
            assert_eq!(EventKind::parse(name).category(), Some(INCIDENT_UPDATE));
        }
        assert_eq!(EventKind::parse("site_health").category(), None);
        assert_eq!(EventKind::parse("heartbeat").category(), None);
    }

    #[test]
    fn test_kind_names_round_trip() {
        assert_eq!(EventKind::parse("connected").as_str(), "connection_established");
        assert_eq!(EventKind::parse("system_status").to_string(), "system_status");
        assert_eq!(
            EventKind::parse("runbook_started"),
            EventKind::Other("runbook_started".into())
        );
        assert!(EventKind::parse("heartbeat").is_heartbeat());
    }

    #[test]
    fn test_decode_named_frame() {
        let event = StreamEvent::from_raw(RawEvent {
            event: "incident_created".into(),
            data: r#"{"id": "inc-1", "severity": "high"}"#.into(),
            id: "42".into(),
        });
        assert_eq!(event.kind(), EventKind::IncidentCreated);
        assert_eq!(event.data["severity"], "high");
        assert_eq!(event.id.as_deref(), Some("42"));
    }

    #[test]
    fn test_decode_typed_payload_and_plain_text() {
        let typed = StreamEvent::from_raw(RawEvent::new("", r#"{"type": "site_health", "site": 3}"#));
        assert_eq!(typed.kind(), EventKind::SiteHealth);

        let plain = StreamEvent::from_raw(RawEvent::new("message", "hello"));
        assert_eq!(plain.event_type, "message");
        assert_eq!(plain.data, Value::String("hello".into()));
        assert_eq!(plain.id, None);
    }
}
