//! Source registry and the multiplexed poll round.
//!
//! The registry owns the source map and the per-source state map, and drives
//! the bounded wait that multiplexes readiness across every registered
//! source. Lock order is sources before states before anything the hub
//! acquires; every method takes its locks internally so callers cannot
//! misorder them.

use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace};

use crate::hub::ListenerHub;
use crate::source::{MessageSink, Source};
use crate::state::{ReaderState, ReaderStatus};

/// Snapshot of every registered source's health, keyed by source name.
pub type ReaderStateMap = BTreeMap<String, ReaderState>;

/// Named collection of sources multiplexed under one bounded wait.
///
/// `add`, `remove` and state snapshots are callable from any thread while a
/// poll round is in flight on another; removal waits for the in-flight round
/// to finish.
pub struct ReaderRegistry {
    hub: Arc<ListenerHub>,
    sources: RwLock<BTreeMap<String, Arc<dyn Source>>>,
    states: RwLock<ReaderStateMap>,
}

impl ReaderRegistry {
    pub fn new(hub: Arc<ListenerHub>) -> Self {
        Self {
            hub,
            sources: RwLock::new(BTreeMap::new()),
            states: RwLock::new(BTreeMap::new()),
        }
    }

    /// The hub this registry broadcasts through.
    pub fn hub(&self) -> &Arc<ListenerHub> {
        &self.hub
    }

    /// Register a source under a unique name. Returns false on duplicate.
    ///
    /// The source's sink is bound here; its state starts pristine.
    pub fn add(&self, name: &str, source: Arc<dyn Source>) -> bool {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        if sources.contains_key(name) {
            return false;
        }
        source.attach(MessageSink::new(name, self.hub.clone()));
        sources.insert(name.to_owned(), source);
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(name.to_owned(), ReaderState::new());
        debug!(source = name, "source registered");
        true
    }

    /// Deregister a source, dropping its state record. Returns false if the
    /// name is unknown.
    pub fn remove(&self, name: &str) -> bool {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        let removed = sources.remove(name).is_some();
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.remove(name);
        if removed {
            debug!(source = name, "source deregistered");
        }
        removed
    }

    pub fn source_count(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Snapshot of every source's current health.
    pub fn states(&self) -> ReaderStateMap {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one poll round, waiting up to `timeout` for any source to become
    /// ready.
    ///
    /// `before_states`, when given, is filled with the state map as it stood
    /// before the round touched anything. With no sources registered the
    /// round returns immediately; otherwise the full timeout is spent even
    /// when no source has a usable wait handle. Wait errors end the round as
    /// if it had timed out. After the round's locks are released, every
    /// source whose state differs from its pre-round value is announced
    /// through the hub, in name order.
    pub fn poll(&self, timeout: Duration, before_states: Option<&mut ReaderStateMap>) {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());

        if let Some(snapshot) = before_states {
            snapshot.clone_from(&states);
        }
        if sources.is_empty() {
            return;
        }

        let previous = states.clone();
        for state in states.values_mut() {
            state.reset_current();
        }

        // Sources without a handle sit the round out, flagged bad.
        let mut waitable: Vec<(&String, RawFd)> = Vec::with_capacity(sources.len());
        for (name, source) in sources.iter() {
            match source.wait_handle() {
                Some(fd) => waitable.push((name, fd)),
                None => {
                    if let Some(state) = states.get_mut(name) {
                        state.record(ReaderStatus::BadHandle);
                    }
                }
            }
        }

        let mut fds: Vec<PollFd<'_>> = waitable
            .iter()
            .map(|&(_, fd)| {
                // Registered sources keep their handle alive for the whole
                // round; the sources lock is held until it ends.
                PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN)
            })
            .collect();

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let ready = match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => n,
            Err(err) => {
                debug!(%err, "multiplexed wait failed, treating as timeout");
                0
            }
        };

        if ready > 0 {
            for (idx, &(name, _)) in waitable.iter().enumerate() {
                let revents = fds[idx].revents().unwrap_or(PollFlags::empty());
                let outcome = if revents.contains(PollFlags::POLLNVAL) {
                    // descriptor closed out from under us, e.g. by a
                    // co-owner of the source
                    debug!(source = name.as_str(), "wait handle no longer valid");
                    ReaderStatus::BadHandle
                } else if revents
                    .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                {
                    match sources[name].read() {
                        Ok(()) => ReaderStatus::HadData,
                        Err(err) => {
                            debug!(source = name.as_str(), %err, "source read failed");
                            ReaderStatus::ReadFailed
                        }
                    }
                } else {
                    continue;
                };
                if let Some(state) = states.get_mut(name) {
                    state.record(outcome);
                }
            }
        }

        let mut changed = Vec::new();
        for (name, state) in states.iter() {
            if previous.get(name).copied() != Some(*state) {
                changed.push((name.clone(), *state));
            }
        }

        drop(states);
        drop(sources);

        for (name, state) in changed {
            trace!(
                source = name.as_str(),
                current = state.current.bits(),
                accumulated = state.accumulated.bits(),
                "source state changed"
            );
            self.hub.notify_state(&name, state);
        }
    }
}
