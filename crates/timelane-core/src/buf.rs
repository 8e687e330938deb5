//! Growable byte accumulation buffer and a borrowed read-only view.
//!
//! `ByteBuf` owns its storage and supports the operations the line-reassembly
//! protocol needs: append at the end, discard a consumed prefix ("realign",
//! shifting the remainder to offset zero), and size queries. `ByteView` is a
//! lifetime-scoped read-only window over externally owned bytes, used to scan
//! a read result in place without copying it.

/// Owned growable byte container.
///
/// Capacity growth is delegated to the underlying `Vec`; nothing other than
/// an explicit [`ByteBuf::truncate`] shrinks the logical size.
#[derive(Debug, Default, Clone)]
pub struct ByteBuf {
    data: Vec<u8>,
}

impl ByteBuf {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create an empty buffer with `capacity` bytes pre-reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append raw bytes at the end.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Discard the first `prefix` bytes, shifting the remainder to the front.
    ///
    /// Realigning past the end clears the buffer.
    pub fn realign(&mut self, prefix: usize) {
        if prefix >= self.data.len() {
            self.data.clear();
            return;
        }
        self.data.copy_within(prefix.., 0);
        self.data.truncate(self.data.len() - prefix);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Read-only view over the buffer's current contents.
    pub fn view(&self) -> ByteView<'_> {
        ByteView::new(&self.data)
    }
}

impl AsRef<[u8]> for ByteBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Read-only window over externally owned bytes.
///
/// A view never copies and never resizes; it exists for scanning a byte run
/// (typically a fresh read result or a `ByteBuf`'s contents) in place.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Offset of the first occurrence of `byte`, if any.
    pub fn find(&self, byte: u8) -> Option<usize> {
        self.bytes.iter().position(|&b| b == byte)
    }

    /// Split at the first occurrence of `terminator`: the bytes before it and
    /// the bytes after it (terminator excluded from both).
    pub fn split_at_terminator(&self, terminator: u8) -> Option<(&'a [u8], &'a [u8])> {
        let pos = self.find(terminator)?;
        Some((&self.bytes[..pos], &self.bytes[pos + 1..]))
    }
}
