//! Per-source health tracking.

use bitmask_enum::bitmask;

/// Health outcomes a source can exhibit during one poll round.
#[bitmask(u8)]
pub enum ReaderStatus {
    /// The source has no usable wait handle.
    BadHandle = 0x01,
    /// A read was attempted and failed.
    ReadFailed = 0x02,
    /// A read was attempted and delivered data.
    HadData = 0x04,
}

/// The current-round and lifetime health of one registered source.
///
/// `current` holds only the outcomes observed in the latest poll round and is
/// reset at the start of every round. `accumulated` is the monotonic OR of
/// every `current` ever observed; it only grows while the source stays
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderState {
    pub current: ReaderStatus,
    pub accumulated: ReaderStatus,
}

impl ReaderState {
    pub fn new() -> Self {
        Self {
            current: ReaderStatus::none(),
            accumulated: ReaderStatus::none(),
        }
    }

    /// Begin a poll round: forget the previous round's outcomes.
    pub fn reset_current(&mut self) {
        self.current = ReaderStatus::none();
    }

    /// Record an outcome for this round, folding it into the lifetime mask.
    pub fn record(&mut self, status: ReaderStatus) {
        self.current |= status;
        self.accumulated |= status;
    }

    /// True when no outcome has ever been recorded.
    pub fn is_pristine(&self) -> bool {
        self.accumulated == ReaderStatus::none()
    }
}

impl Default for ReaderState {
    fn default() -> Self {
        Self::new()
    }
}
