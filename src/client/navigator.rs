//! Navigation hook used when the server rejects the credential
//!
//! The request client does not own any UI; it only needs to know where the
//! user currently is and how to send them to the login view.

use std::sync::Mutex;
use tracing::info;

/// Client-side navigation seam
pub trait Navigator: Send + Sync {
    /// Route currently displayed
    fn current_route(&self) -> String;

    /// Navigate to `route`
    fn navigate(&self, route: &str);
}

/// Navigator that records the current route and logs transitions.
///
/// Used by the CLI and in tests; UI shells supply their own implementation.
#[derive(Debug)]
pub struct RouteTracker {
    route: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl RouteTracker {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            route: Mutex::new(initial.into()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Routes navigated to, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RouteTracker {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for RouteTracker {
    fn current_route(&self) -> String {
        self.route.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn navigate(&self, route: &str) {
        info!(route, "Navigating");
        *self.route.lock().unwrap_or_else(|e| e.into_inner()) = route.to_string();
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(route.to_string());
    }
}

/// Whether `current` already shows the login view at `login_route`
pub(crate) fn is_login_route(current: &str, login_route: &str) -> bool {
    let path = current.split(&['?', '#'][..]).next().unwrap_or(current);
    path == login_route || path.starts_with(&format!("{}/", login_route.trim_end_matches('/')))
}
