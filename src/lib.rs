//! remedy-link - resilient communication layer for the remediation control panel
//!
//! Provides:
//! - A credential store mirrored across ranked storage locations
//! - A request client with refresh, retry, envelope unwrapping and
//!   unauthorized handling
//! - An auto-reconnecting event stream with typed listener fan-out
//! - A bridge that keeps the stream connected only while authenticated

pub mod auth;
pub mod bridge;
pub mod client;
pub mod config;
pub mod events;
pub mod logging;
pub mod types;

pub use auth::{AuthStatus, CredentialBackend, CredentialStore};
pub use bridge::EventBridge;
pub use client::{AuthSession, LoginRequest, Navigator, Page, RequestClient, RouteTracker};
pub use config::ClientConfig;
pub use events::{EventStreamClient, ListenerHandle, StreamConfig, StreamEvent};
pub use types::{ClientError, ErrorKind, Result};
