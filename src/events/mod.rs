//! Real-time event stream
//!
//! Provides:
//! - Decoding of server-sent frames into typed events
//! - A listener registry with per-type and category fan-out
//! - An auto-reconnecting subscriber with bounded retry

pub mod registry;
pub mod subscriber;
pub mod transport;
pub mod types;

pub use registry::{DispatchReport, ListenerHandle, ListenerRegistry};
pub use subscriber::{
    ConnectionState, EventStreamClient, ReconnectBackoff, StreamConfig, StreamStatus,
    MAX_ATTEMPTS_REACHED, NO_CREDENTIAL,
};
pub use transport::{EventFeed, EventTransport, SseTransport};
pub use types::{EventKind, RawEvent, StreamEvent, ANY_EVENT, INCIDENT_UPDATE};
