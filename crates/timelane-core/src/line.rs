//! Bounded line reassembly over a byte accumulation buffer.
//!
//! Bytes arrive in arbitrary fragments; a `LineBuffer` collects them up to a
//! hard cap and drains every complete `\n`-terminated line, leaving any
//! partial tail buffered for the next read.

use crate::buf::ByteBuf;
use crate::source::ReadError;

/// Default per-source cap on buffered, not-yet-terminated bytes.
pub const DEFAULT_LINE_CAP: usize = 64 * 1024;

/// Accumulates fragmented reads and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: ByteBuf,
    cap: usize,
}

impl LineBuffer {
    /// A buffer that refuses to hold more than `cap` unterminated bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: ByteBuf::new(),
            cap,
        }
    }

    /// Bytes currently buffered (all part of an incomplete line once drained).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Room left before the cap. Zero means the next push must overflow.
    pub fn remaining(&self) -> usize {
        self.cap - self.buf.len().min(self.cap)
    }

    /// Append freshly read bytes.
    ///
    /// A push that would exceed the cap is rejected whole; nothing is
    /// truncated or dropped silently.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), ReadError> {
        if bytes.len() > self.remaining() {
            return Err(ReadError::Overflow(self.cap));
        }
        self.buf.append(bytes);
        Ok(())
    }

    /// Drain every complete line, invoking `emit` with the line text
    /// (terminator excluded). Bytes after the last terminator stay buffered.
    ///
    /// Returns the number of lines emitted. Non-UTF-8 bytes are replaced
    /// lossily; the wire protocol is text.
    pub fn drain_lines(&mut self, mut emit: impl FnMut(&str)) -> usize {
        let mut emitted = 0;
        loop {
            let Some((head, _tail)) = self.buf.view().split_at_terminator(b'\n') else {
                break;
            };
            let consumed = head.len() + 1;
            let line = String::from_utf8_lossy(head).into_owned();
            self.buf.realign(consumed);
            emit(&line);
            emitted += 1;
        }
        emitted
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_CAP)
    }
}
