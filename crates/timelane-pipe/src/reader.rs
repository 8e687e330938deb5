use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::{debug, trace};

use timelane_core::{LineBuffer, MessageSink, ReadError, Source};

/// One FIFO on disk, read non-blocking, feeding the registry line by line.
///
/// The read-side descriptor is opened at construction and stays the wait
/// handle for the reader's whole life. Bytes are buffered up to the line cap;
/// a full buffer with no terminator is an overflow, never a truncation.
pub struct PipeReader {
    path: PathBuf,
    file: Mutex<File>,
    lines: Mutex<LineBuffer>,
    sink: OnceLock<MessageSink>,
    destroy_on_close: AtomicBool,
}

impl PipeReader {
    /// Open a pre-existing FIFO for reading.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        // O_NONBLOCK also keeps the open itself from blocking on a FIFO
        // that has no writer yet.
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;
        debug!(path = %path.display(), "fifo opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
            lines: Mutex::new(LineBuffer::default()),
            sink: OnceLock::new(),
            destroy_on_close: AtomicBool::new(false),
        })
    }

    /// Create the FIFO on disk, then open it. The file is unlinked when the
    /// reader is dropped.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        use nix::sys::stat::Mode;
        let path = path.into();
        // 0662: producers running as other users may write, only the owner reads.
        let mode =
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP | Mode::S_IWOTH;
        nix::unistd::mkfifo(&path, mode).map_err(io::Error::other)?;
        debug!(path = %path.display(), "fifo created");
        let reader = Self::open(path)?;
        reader.destroy_on_close.store(true, Ordering::Relaxed);
        Ok(reader)
    }

    /// Whether the FIFO is unlinked when this reader is dropped.
    pub fn destroy_on_close(self, destroy: bool) -> Self {
        self.destroy_on_close.store(destroy, Ordering::Relaxed);
        self
    }

    /// Replace the default 64 KiB line cap. Intended for use before the
    /// reader sees any bytes.
    pub fn with_line_cap(self, cap: usize) -> Self {
        *self.lines.lock().unwrap_or_else(|e| e.into_inner()) = LineBuffer::new(cap);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for PipeReader {
    fn attach(&self, sink: MessageSink) {
        let _ = self.sink.set(sink);
    }

    fn wait_handle(&self) -> Option<RawFd> {
        Some(self.file.lock().unwrap_or_else(|e| e.into_inner()).as_raw_fd())
    }

    /// One read into the line buffer's remaining room, then drain complete
    /// lines through the sink.
    fn read(&self) -> Result<(), ReadError> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let room = lines.remaining();
        if room == 0 {
            return Err(ReadError::Overflow(lines.cap()));
        }

        let mut chunk = vec![0u8; room];
        let n = {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            match file.read(&mut chunk) {
                Ok(n) => n,
                // Readiness raced away; nothing happened this round.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ReadError::Io(e)),
            }
        };
        if n == 0 {
            return Err(ReadError::Closed);
        }

        lines.push(&chunk[..n])?;
        let emitted = if let Some(sink) = self.sink.get() {
            lines.drain_lines(|line| sink.emit(line))
        } else {
            0
        };
        trace!(
            path = %self.path.display(),
            bytes = n,
            lines = emitted,
            buffered = lines.len(),
            "fifo read"
        );
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if self.destroy_on_close.load(Ordering::Relaxed) {
            if let Err(err) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), %err, "fifo unlink failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::FileTypeExt;
    use std::sync::Arc;

    use timelane_core::MessageHandler;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl MessageHandler for Recorder {
        fn on_message(&self, source: &str, line: &str) {
            self.0.lock().unwrap().push(format!("{source}: {line}"));
        }
    }

    fn attach_recorder(reader: &PipeReader) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        reader.attach(MessageSink::new("pipe", recorder.clone()));
        recorder
    }

    fn writer(path: &Path) -> File {
        OpenOptions::new().write(true).open(path).unwrap()
    }

    #[test]
    fn create_makes_a_fifo_and_drop_unlinks_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        let reader = PipeReader::create(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
        drop(reader);
        assert!(!path.exists());
    }

    #[test]
    fn created_fifo_grants_group_and_other_write() {
        use nix::sys::stat::Mode;
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        // mask nothing so the requested mode bits are observable
        let old_umask = nix::sys::stat::umask(Mode::empty());
        let reader = PipeReader::create(&path);
        nix::sys::stat::umask(old_umask);
        let _reader = reader.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o662);
    }

    #[test]
    fn open_keeps_the_fifo_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRWXU).unwrap();
        let reader = PipeReader::open(&path).unwrap();
        drop(reader);
        assert!(path.exists());
    }

    #[test]
    fn open_missing_path_errors() {
        assert!(PipeReader::open("/nonexistent/events.pipe").is_err());
    }

    #[test]
    fn create_over_existing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        std::fs::write(&path, b"occupied").unwrap();
        assert!(PipeReader::create(&path).is_err());
    }

    #[test]
    fn fragmented_writes_come_out_as_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        let reader = PipeReader::create(&path).unwrap();
        let recorder = attach_recorder(&reader);

        let mut w = writer(&path);
        w.write_all(b"first\nsec").unwrap();
        reader.read().unwrap();
        w.write_all(b"ond\nthird\n").unwrap();
        reader.read().unwrap();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["pipe: first", "pipe: second", "pipe: third"]
        );
    }

    #[test]
    fn read_with_no_writer_reports_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        let reader = PipeReader::create(&path).unwrap();
        attach_recorder(&reader);
        assert!(matches!(reader.read(), Err(ReadError::Closed)));
    }

    #[test]
    fn full_buffer_without_terminator_overflows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        let reader = PipeReader::create(&path).unwrap().with_line_cap(8);
        attach_recorder(&reader);

        let mut w = writer(&path);
        w.write_all(b"123456789").unwrap();
        // first read fills the cap without finding a terminator
        reader.read().unwrap();
        assert!(matches!(reader.read(), Err(ReadError::Overflow(8))));
    }

    #[test]
    fn wait_handle_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.pipe");
        let reader = PipeReader::create(&path).unwrap();
        let first = reader.wait_handle();
        assert!(first.is_some());
        assert_eq!(reader.wait_handle(), first);
    }
}
