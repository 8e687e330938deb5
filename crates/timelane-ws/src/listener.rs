use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use timelane_core::{Listener, ReaderState};

/// Wire frame pushed to a WebSocket client, tagged by event kind.
#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum Frame<'a> {
    #[serde(rename = "state_change")]
    StateChange {
        source: &'a str,
        current_state: u8,
        accumulated_state: u8,
    },
    #[serde(rename = "timeline_event")]
    TimelineEvent {
        source: &'a str,
        message: serde_json::Value,
    },
}

/// Lines that are themselves JSON are embedded as JSON values; anything else
/// becomes a properly escaped JSON string.
fn message_value(message: &str) -> serde_json::Value {
    serde_json::from_str(message)
        .unwrap_or_else(|_| serde_json::Value::String(message.to_owned()))
}

fn encode(frame: &Frame<'_>) -> String {
    // Frame serialization cannot fail: no non-string map keys, no
    // custom Serialize impls.
    serde_json::to_string(frame).unwrap_or_default()
}

pub(crate) fn timeline_frame(source: &str, message: &str) -> String {
    encode(&Frame::TimelineEvent {
        source,
        message: message_value(message),
    })
}

pub(crate) fn state_frame(source: &str, state: ReaderState) -> String {
    encode(&Frame::StateChange {
        source,
        current_state: state.current.bits(),
        accumulated_state: state.accumulated.bits(),
    })
}

/// Frames buffered per client before new ones are dropped.
pub const FRAME_QUEUE_LIMIT: usize = 256;

/// One connected client's view of the hub.
///
/// Serializes every broadcast into a JSON frame and queues it for the
/// client's writer task. The queue is bounded: a client that stops reading
/// never blocks the delivery path and never grows memory — frames past
/// [`FRAME_QUEUE_LIMIT`] are dropped until the client catches up.
pub struct WsListener {
    frames: mpsc::Sender<String>,
}

impl WsListener {
    /// A listener plus the receiving end its client task drains.
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (frames, rx) = mpsc::channel(FRAME_QUEUE_LIMIT);
        (Self { frames }, rx)
    }

    fn push(&self, frame: String) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("ws client frame queue full, dropping frame");
            }
            // client task already gone; the hub will deregister it shortly
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Listener for WsListener {
    fn state_change(&self, source: &str, state: ReaderState) {
        let frame = state_frame(source, state);
        trace!(source, frame = frame.as_str(), "ws state frame");
        self.push(frame);
    }

    fn timeline_event(&self, source: &str, message: &str) {
        self.push(timeline_frame(source, message));
    }
}
