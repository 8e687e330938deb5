//! Core of the timelane event pipeline.
//!
//! Line-oriented event text arrives from many independent byte-stream sources
//! (named pipes in the reference deployment). This crate reassembles discrete
//! messages, tracks per-source health, and re-broadcasts every message plus
//! health transitions to a dynamic set of listeners, replaying recent history
//! to newly joined listeners.
//!
//! Pipeline: [`Source`]s are registered in a [`ReaderRegistry`] that
//! multiplexes readiness across all of them under a single bounded wait.
//! Complete lines flow through each source's [`MessageSink`] into the
//! [`ListenerHub`], which fans them out to every registered [`Listener`].
//! Health outcomes are accumulated per source in a [`ReaderState`] and
//! broadcast on change.

pub mod buf;
pub mod hub;
pub mod line;
pub mod registry;
pub mod source;
pub mod state;

pub use buf::{ByteBuf, ByteView};
pub use hub::{Listener, ListenerHub, RECENT_MESSAGE_LIMIT};
pub use line::LineBuffer;
pub use registry::{ReaderRegistry, ReaderStateMap};
pub use source::{MessageHandler, MessageSink, ReadError, Source};
pub use state::{ReaderState, ReaderStatus};
