//! Listener registry for stream events
//!
//! Dispatch snapshots the listener list before invoking anything, so
//! listeners may register or deregister (including themselves) while an
//! event is being delivered. Channel subscribers whose receiver is gone are
//! collected during the pass and removed afterwards.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::types::StreamEvent;

/// Callback invoked for each matching event
pub type Callback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<StreamEvent>),
}

#[derive(Clone)]
struct Entry {
    id: u64,
    sink: Sink,
}

/// Outcome of delivering one event to one listener key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Event type name to ordered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` under `event_type`
    pub fn add<F>(self: &Arc<Self>, event_type: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.insert(event_type, Sink::Callback(Arc::new(callback)))
    }

    /// Register a channel that receives a copy of every matching event
    pub fn subscribe(
        self: &Arc<Self>,
        event_type: &str,
    ) -> (ListenerHandle, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(event_type, Sink::Channel(tx)), rx)
    }

    fn insert(self: &Arc<Self>, event_type: &str, sink: Sink) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(event_type.to_string())
            .or_default()
            .push(Entry { id, sink });

        debug!(event_type, listener_id = id, "Listener registered");
        ListenerHandle {
            registry: Arc::downgrade(self),
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Remove one listener; `false` if it was already gone
    pub fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Number of listeners registered under `event_type`
    pub fn count(&self, event_type: &str) -> usize {
        self.lock().get(event_type).map_or(0, Vec::len)
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Deliver `event` to the listeners registered under `key`, in
    /// registration order. A panicking listener is logged and skipped.
    pub fn dispatch(&self, key: &str, event: &StreamEvent) -> DispatchReport {
        let snapshot: Vec<Entry> = match self.lock().get(key) {
            Some(entries) => entries.clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        let mut closed = Vec::new();

        for entry in &snapshot {
            match &entry.sink {
                Sink::Callback(callback) => {
                    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                        Ok(()) => report.delivered += 1,
                        Err(panic) => {
                            report.failed += 1;
                            error!(
                                event_type = %event.event_type,
                                listener_key = key,
                                listener_id = entry.id,
                                panic = %panic_message(&*panic),
                                "Event listener failed"
                            );
                        }
                    }
                }
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        report.delivered += 1;
                    } else {
                        closed.push(entry.id);
                    }
                }
            }
        }

        for id in closed {
            if self.remove(key, id) {
                report.pruned += 1;
                debug!(listener_key = key, listener_id = id, "Pruned closed subscriber");
            }
        }

        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Deregistration handle returned by the registry.
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    registry: Weak<ListenerRegistry>,
    event_type: String,
    id: u64,
}

impl ListenerHandle {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deregister the listener; `false` if it was already removed
    pub fn remove(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.event_type, self.id),
            None => false,
        }
    }
}
