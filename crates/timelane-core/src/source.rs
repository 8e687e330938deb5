//! The capability contract every event source implements, and the sink a
//! source uses to emit reassembled lines.

use std::os::fd::RawFd;
use std::sync::Arc;

use thiserror::Error;

/// Outcome of a single [`Source::read`] call that did not succeed.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The line buffer reached its cap ({0} bytes) with no terminator in
    /// sight. The source cannot make progress; its owner should remove it.
    #[error("line buffer at capacity ({0} bytes) with no terminator")]
    Overflow(usize),

    /// The source closed when it was expected to have data.
    #[error("source closed unexpectedly")]
    Closed,

    /// Transient I/O failure; the underlying error code is preserved.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Receives every reassembled line, tagged with the emitting source's name.
///
/// The registry's [`crate::ListenerHub`] is the production implementation.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, source: &str, line: &str);
}

/// A source's one-shot message-emission capability.
///
/// Bound at registration time; carries the registry name the source was
/// added under so the source itself never needs to know it.
#[derive(Clone)]
pub struct MessageSink {
    source: String,
    handler: Arc<dyn MessageHandler>,
}

impl MessageSink {
    pub fn new(source: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            source: source.into(),
            handler,
        }
    }

    /// Name of the source this sink was bound for.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Emit one complete line (terminator already stripped).
    pub fn emit(&self, line: &str) {
        self.handler.on_message(&self.source, line);
    }
}

impl std::fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSink")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// A named, poll-multiplexed producer of line-oriented text.
///
/// Implementations are registered by `Arc` and shared between the registry
/// and the caller that created them; the last owner to drop the `Arc`
/// disposes of the source.
pub trait Source: Send + Sync {
    /// Bind the sink used to emit lines for the rest of this source's life.
    /// Called exactly once, by the registry, at registration.
    fn attach(&self, sink: MessageSink);

    /// Readiness descriptor for the multiplexed wait, or `None` if this
    /// source can never signal readiness. Must stay stable for the entire
    /// registered lifetime.
    fn wait_handle(&self) -> Option<RawFd>;

    /// Read available bytes and emit every complete line through the sink.
    /// Invoked only when the wait handle reported ready.
    fn read(&self) -> Result<(), ReadError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(String, String)>>);

    impl MessageHandler for Recorder {
        fn on_message(&self, source: &str, line: &str) {
            self.0
                .lock()
                .unwrap()
                .push((source.to_owned(), line.to_owned()));
        }
    }

    #[test]
    fn sink_tags_lines_with_its_source_name() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let sink = MessageSink::new("alpha", recorder.clone() as Arc<dyn MessageHandler>);
        sink.emit("first");
        sink.emit("second");
        let seen = recorder.0.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("alpha".to_owned(), "first".to_owned()),
                ("alpha".to_owned(), "second".to_owned()),
            ]
        );
    }

    #[test]
    fn overflow_error_reports_cap() {
        let err = ReadError::Overflow(4096);
        assert_eq!(
            err.to_string(),
            "line buffer at capacity (4096 bytes) with no terminator"
        );
    }
}
