//! Authentication-driven stream supervision
//!
//! The bridge watches the credential store's [`AuthStatus`] and keeps the
//! event stream in step with it. Decisions are level-triggered: the current
//! status is evaluated on every change, so repeated notifications of the same
//! level are harmless (connect and disconnect are idempotent).

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::AuthStatus;
use crate::events::EventStreamClient;

/// Connects the stream while authenticated, disconnects otherwise
pub struct EventBridge {
    stream: Arc<EventStreamClient>,
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Start supervising `stream` from `auth_rx`
    pub fn spawn(stream: Arc<EventStreamClient>, mut auth_rx: watch::Receiver<AuthStatus>) -> Self {
        let supervised = Arc::clone(&stream);
        let task = tokio::spawn(async move {
            loop {
                let status = *auth_rx.borrow_and_update();
                apply(&supervised, status);
                if auth_rx.changed().await.is_err() {
                    debug!("Auth status source closed, bridge stopping");
                    break;
                }
            }
        });

        Self { stream, task }
    }

    pub fn stream(&self) -> &Arc<EventStreamClient> {
        &self.stream
    }

    /// Stop supervising and close the stream
    pub fn shutdown(self) {
        self.task.abort();
        self.stream.disconnect();
        info!("Event bridge shut down");
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn apply(stream: &EventStreamClient, status: AuthStatus) {
    match status {
        AuthStatus::Checking => debug!("Auth check in progress, leaving stream as is"),
        AuthStatus::Authenticated => stream.connect(),
        AuthStatus::Anonymous => stream.disconnect(),
    }
}
