//! Event stream client
//!
//! Keeps one push channel open to the backend and fans its events out to
//! registered listeners.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!       ^                        |                    |
//!       |                        +------error---------+
//!  disconnect()                            |
//!       |                                  v
//!       +--------------------------- Erroring --timer--> Connecting
//!                                          |
//!                                   attempts exhausted (terminal)
//! ```
//!
//! Every attempt gets a fresh connection id. At most one reconnect timer
//! exists at a time, and `disconnect()` aborts it along with the channel.
//! Each attempt carries a generation number; callbacks from an attempt that
//! was superseded or disconnected are ignored.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::registry::{ListenerHandle, ListenerRegistry};
use super::transport::{EventTransport, SseTransport};
use super::types::{RawEvent, StreamEvent, ANY_EVENT};
use crate::auth::CredentialStore;
use crate::config::{env_millis, normalize_base};
use crate::types::{ClientError, Result};

/// Reported when connect is attempted without a credential
pub const NO_CREDENTIAL: &str = "No authentication token available";

/// Reported once reconnect attempts are exhausted
pub const MAX_ATTEMPTS_REACHED: &str = "Max reconnection attempts reached";

/// Delay schedule between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectBackoff {
    /// Same delay before every attempt
    Fixed(Duration),
    /// `base × 2^(attempt−1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl ReconnectBackoff {
    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

/// Event stream configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// API base address the stream path is joined to
    pub base_url: String,
    /// Stream endpoint path
    pub stream_path: String,
    /// Consecutive failed attempts tolerated before giving up
    pub max_reconnect_attempts: u32,
    pub backoff: ReconnectBackoff,
    /// Query parameter carrying the credential
    pub token_param: String,
    /// Query parameter carrying the connection id
    pub connection_param: String,
    /// Limit on establishing the channel; a slow open counts as a failed attempt
    pub open_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            stream_path: "/events/stream".to_string(),
            max_reconnect_attempts: 10,
            backoff: ReconnectBackoff::Exponential {
                base: Duration::from_millis(3000),
                max: Duration::from_secs(30),
            },
            token_param: "token".to_string(),
            connection_param: "connectionId".to_string(),
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval =
            env_millis("REMEDY_RECONNECT_INTERVAL_MS").unwrap_or(Duration::from_millis(3000));
        let fixed = std::env::var("REMEDY_FIXED_RECONNECT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            base_url: std::env::var("REMEDY_API_URL").unwrap_or(defaults.base_url),
            stream_path: std::env::var("REMEDY_STREAM_PATH").unwrap_or(defaults.stream_path),
            open_timeout: env_millis("REMEDY_STREAM_OPEN_TIMEOUT_MS")
                .unwrap_or(defaults.open_timeout),
            max_reconnect_attempts: std::env::var("REMEDY_MAX_RECONNECT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_reconnect_attempts),
            backoff: if fixed {
                ReconnectBackoff::Fixed(interval)
            } else {
                ReconnectBackoff::Exponential {
                    base: interval,
                    max: Duration::from_secs(30),
                }
            },
            ..defaults
        }
    }

    /// Channel address for one attempt
    pub fn stream_url(&self, connection_id: &Uuid, token: &str) -> Result<Url> {
        let base = normalize_base(&self.base_url)?;
        let mut url = base.join(self.stream_path.trim_start_matches('/'))?;
        url.query_pairs_mut()
            .append_pair(&self.connection_param, &connection_id.to_string())
            .append_pair(&self.token_param, token);
        Ok(url)
    }
}

/// Channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Erroring,
}

/// Observable snapshot of the stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    /// Id of the current (or last) attempt
    pub connection_id: Option<Uuid>,
    /// Consecutive failed attempts since the last successful open
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_event: Option<StreamEvent>,
    /// A reconnect timer is scheduled
    pub reconnect_pending: bool,
    /// Attempts exhausted; nothing further is scheduled
    pub exhausted: bool,
}

impl StreamStatus {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connection_id: None,
            reconnect_attempts: 0,
            last_error: None,
            last_event: None,
            reconnect_pending: false,
            exhausted: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }
}

#[derive(Default)]
struct Control {
    generation: u64,
    session: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl Control {
    fn abort_tasks(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}

struct Inner {
    config: StreamConfig,
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn EventTransport>,
    registry: Arc<ListenerRegistry>,
    control: Mutex<Control>,
    status_tx: watch::Sender<StreamStatus>,
}

/// Auto-reconnecting event stream subscriber
pub struct EventStreamClient {
    inner: Arc<Inner>,
}

impl EventStreamClient {
    /// Create a client that speaks server-sent events
    pub fn new(config: StreamConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let transport = SseTransport::new()?.with_open_timeout(config.open_timeout);
        Ok(Self::with_transport(config, credentials, Arc::new(transport)))
    }

    /// Create a client over a custom transport
    pub fn with_transport(
        config: StreamConfig,
        credentials: Arc<CredentialStore>,
        transport: Arc<dyn EventTransport>,
    ) -> Self {
        let (status_tx, _) = watch::channel(StreamStatus::initial());
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                transport,
                registry: ListenerRegistry::new(),
                control: Mutex::new(Control::default()),
                status_tx,
            }),
        }
    }

    /// Open the channel unless it is already open, opening, or waiting to
    /// reconnect.
    ///
    /// Must be called from within a tokio runtime. An explicit call after
    /// attempts were exhausted starts a fresh cycle.
    pub fn connect(&self) {
        let mut control = self.inner.lock_control();
        let status = self.status();

        if status.is_connected() || status.is_connecting() || control.timer.is_some() {
            debug!(state = ?status.state, "connect() ignored, stream already active");
            return;
        }

        if status.exhausted {
            self.inner.status_tx.send_modify(|s| {
                s.exhausted = false;
                s.reconnect_attempts = 0;
            });
        }

        self.inner.start_attempt(&mut control);
    }

    /// Close the channel and cancel any pending reconnect
    pub fn disconnect(&self) {
        let mut control = self.inner.lock_control();
        control.generation += 1;
        control.abort_tasks();

        let was = self.status().state;
        self.inner.status_tx.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.connection_id = None;
            s.reconnect_attempts = 0;
            s.reconnect_pending = false;
            s.exhausted = false;
            s.last_error = None;
        });

        if was != ConnectionState::Disconnected {
            info!("Event stream disconnected");
        }
    }

    /// Register `callback` for `event_type`
    pub fn add_event_listener<F>(&self, event_type: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.registry.add(event_type, callback)
    }

    /// Receive `event_type` events on a channel
    pub fn subscribe(
        &self,
        event_type: &str,
    ) -> (ListenerHandle, mpsc::UnboundedReceiver<StreamEvent>) {
        self.inner.registry.subscribe(event_type)
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Current snapshot
    pub fn status(&self) -> StreamStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status_tx.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.status_tx.borrow().is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.status_tx.borrow().last_error.clone()
    }

    pub fn last_event(&self) -> Option<StreamEvent> {
        self.inner.status_tx.borrow().last_event.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.status_tx.borrow().reconnect_attempts
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.inner.status_tx.borrow().connection_id
    }

    /// Whether a reconnect timer is scheduled
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_control().timer.is_some()
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        let mut control = self.inner.lock_control();
        control.generation += 1;
        control.abort_tasks();
    }
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fail(&self, message: &str) {
        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Erroring;
            s.connection_id = None;
            s.reconnect_pending = false;
            s.last_error = Some(message.to_string());
        });
    }

    /// Begin one connection attempt. Caller holds the control lock.
    fn start_attempt(self: &Arc<Self>, control: &mut Control) {
        let Some(token) = self.credentials.get() else {
            warn!("{}", NO_CREDENTIAL);
            self.fail(NO_CREDENTIAL);
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Event stream connect requires a tokio runtime");
            self.fail("No async runtime available");
            return;
        };

        let connection_id = Uuid::new_v4();
        let url = match self.config.stream_url(&connection_id, &token) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Invalid event stream address");
                self.fail(&e.to_string());
                return;
            }
        };

        control.generation += 1;
        let generation = control.generation;

        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.connection_id = Some(connection_id);
            s.reconnect_pending = false;
        });

        info!(
            connection_id = %connection_id,
            attempt = self.status_tx.borrow().reconnect_attempts,
            "Opening event stream"
        );

        let inner = Arc::clone(self);
        control.session = Some(runtime.spawn(async move {
            inner.run_session(generation, url).await;
        }));
    }

    async fn run_session(self: Arc<Self>, generation: u64, url: Url) {
        let outcome = match self.transport.open(url).await {
            Ok(mut feed) => {
                if !self.mark_open(generation) {
                    return;
                }
                loop {
                    match feed.next().await {
                        Some(Ok(raw)) => {
                            if !self.is_current(generation) {
                                return;
                            }
                            self.deliver(raw);
                        }
                        Some(Err(e)) => break e,
                        None => break ClientError::Stream("Event stream closed by server".into()),
                    }
                }
            }
            Err(e) => e,
        };

        self.on_channel_error(generation, outcome.to_string());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_control().generation == generation
    }

    fn mark_open(&self, generation: u64) -> bool {
        let control = self.lock_control();
        if control.generation != generation {
            return false;
        }

        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Connected;
            s.reconnect_attempts = 0;
            s.last_error = None;
            s.exhausted = false;
        });
        info!(connection_id = ?self.status_tx.borrow().connection_id, "Event stream connected");
        true
    }

    /// Record and fan out one event
    fn deliver(&self, raw: RawEvent) {
        let event = StreamEvent::from_raw(raw);
        let kind = event.kind();

        self.status_tx.send_modify(|s| s.last_event = Some(event.clone()));

        if kind.is_heartbeat() {
            trace!("Heartbeat received");
            self.registry.dispatch(kind.as_str(), &event);
            return;
        }

        debug!(event_type = %kind, "Event received");
        self.registry.dispatch(kind.as_str(), &event);
        if let Some(category) = kind.category() {
            self.registry.dispatch(category, &event);
        }
        self.registry.dispatch(ANY_EVENT, &event);
    }

    fn on_channel_error(self: &Arc<Self>, generation: u64, message: String) {
        let mut control = self.lock_control();
        if control.generation != generation {
            return;
        }
        control.session = None;

        let attempts = self.status_tx.borrow().reconnect_attempts;
        let max = self.config.max_reconnect_attempts;

        if attempts >= max {
            error!(attempts, error = %message, "{}", MAX_ATTEMPTS_REACHED);
            self.status_tx.send_modify(|s| {
                s.state = ConnectionState::Erroring;
                s.connection_id = None;
                s.reconnect_pending = false;
                s.exhausted = true;
                s.last_error = Some(MAX_ATTEMPTS_REACHED.to_string());
            });
            return;
        }

        let attempt = attempts + 1;
        let delay = self.config.backoff.delay(attempt);

        if let Some(previous) = control.timer.take() {
            previous.abort();
        }

        warn!(
            error = %message,
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            "Event stream error, scheduling reconnect"
        );

        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Erroring;
            s.reconnect_attempts = attempt;
            s.reconnect_pending = true;
            s.last_error = Some(message);
        });

        let inner = Arc::clone(self);
        control.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut control = self.lock_control();
        if control.generation != generation {
            return;
        }
        control.timer = None;
        self.start_attempt(&mut control);
    }
}
