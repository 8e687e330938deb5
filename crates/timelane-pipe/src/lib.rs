//! Named-pipe (FIFO) source for the timelane registry.
//!
//! A [`PipeReader`] opens a FIFO non-blocking on the read side, exposes its
//! descriptor as the registry's wait handle, and reassembles whatever byte
//! fragments arrive into complete lines.

mod reader;

pub use reader::PipeReader;
