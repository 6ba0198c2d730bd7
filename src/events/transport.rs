//! Push channel transports
//!
//! The subscriber only needs "open this URL and give me frames until it
//! breaks". [`SseTransport`] does that over HTTP server-sent events; tests
//! plug in scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use url::Url;

use super::types::RawEvent;
use crate::types::{ClientError, Result};

/// Frames from an open channel; the stream ends or yields an error when the
/// channel breaks
pub type EventFeed = BoxStream<'static, Result<RawEvent>>;

/// Opens a unidirectional server-to-client channel
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open the channel at `url`. Credentials travel in the URL because the
    /// channel cannot carry custom headers.
    async fn open(&self, url: Url) -> Result<EventFeed>;
}

/// Server-sent events over reqwest
pub struct SseTransport {
    http: Client,
    open_timeout: Duration,
}

impl SseTransport {
    /// Create a transport with its own HTTP client
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("remedy-link/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            open_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn open(&self, url: Url) -> Result<EventFeed> {
        let request = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let response = tokio::time::timeout(self.open_timeout, request)
            .await
            .map_err(|_| ClientError::Stream("Timed out opening event stream".into()))?
            .map_err(|e| ClientError::Stream(format!("Failed to open event stream: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Stream(format!(
                "Event stream rejected with status {}",
                status
            )));
        }

        let feed = response
            .bytes_stream()
            .eventsource()
            .map(|frame| match frame {
                Ok(event) => Ok(RawEvent {
                    event: event.event,
                    data: event.data,
                    id: event.id,
                }),
                Err(e) => Err(ClientError::Stream(e.to_string())),
            });

        Ok(feed.boxed())
    }
}
