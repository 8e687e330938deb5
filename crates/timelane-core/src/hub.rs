//! Listener registry, message fan-out and bounded replay history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::source::MessageHandler;
use crate::state::ReaderState;

/// How many delivered messages are retained for replay to new listeners.
pub const RECENT_MESSAGE_LIMIT: usize = 1000;

/// Receives every broadcast the hub makes.
pub trait Listener: Send + Sync {
    /// A source's health changed during a poll round.
    fn state_change(&self, source: &str, state: ReaderState);

    /// A source emitted one complete line.
    fn timeline_event(&self, source: &str, message: &str);
}

/// Fans every message and state transition out to a named set of listeners.
///
/// The hub keeps the last [`RECENT_MESSAGE_LIMIT`] messages, newest first, and
/// replays them to each listener at registration so late joiners see recent
/// history. Lock order is listeners before the recent log, always.
pub struct ListenerHub {
    listeners: RwLock<BTreeMap<String, Arc<dyn Listener>>>,
    recent: RwLock<VecDeque<(String, String)>>,
}

impl ListenerHub {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            recent: RwLock::new(VecDeque::with_capacity(RECENT_MESSAGE_LIMIT)),
        }
    }

    /// Register a listener under a unique name. Returns false on duplicate.
    ///
    /// The recent-message log is replayed to the new listener, newest first,
    /// before this returns; deliveries racing the registration are excluded
    /// until the replay completes.
    pub fn add_listener(&self, name: &str, listener: Arc<dyn Listener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if listeners.contains_key(name) {
            return false;
        }
        {
            let recent = self.recent.read().unwrap_or_else(|e| e.into_inner());
            for (source, message) in recent.iter() {
                listener.timeline_event(source, message);
            }
        }
        listeners.insert(name.to_owned(), listener);
        debug!(listener = name, "listener added");
        true
    }

    /// Deregister a listener. Returns false if the name is unknown.
    pub fn remove_listener(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let removed = listeners.remove(name).is_some();
        if removed {
            debug!(listener = name, "listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Record a message and fan it out to every listener in name order.
    pub fn deliver(&self, source: &str, message: &str) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        {
            let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
            recent.push_front((source.to_owned(), message.to_owned()));
            recent.truncate(RECENT_MESSAGE_LIMIT);
        }
        for listener in listeners.values() {
            listener.timeline_event(source, message);
        }
    }

    /// Broadcast a source's health transition to every listener in name order.
    pub fn notify_state(&self, source: &str, state: ReaderState) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.values() {
            listener.state_change(source, state);
        }
    }
}

impl Default for ListenerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler for ListenerHub {
    fn on_message(&self, source: &str, line: &str) {
        self.deliver(source, line);
    }
}
