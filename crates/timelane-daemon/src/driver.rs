//! Poller thread and CLI pipe-spec parsing.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use timelane_core::ReaderRegistry;

/// One `NAME=PATH` pipe argument from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSpec {
    pub name: String,
    pub path: PathBuf,
}

/// Parse a `NAME=PATH` pipe specification.
pub fn parse_pipe_spec(raw: &str) -> Result<PipeSpec, String> {
    let Some((name, path)) = raw.split_once('=') else {
        return Err(format!("expected NAME=PATH, got `{raw}`"));
    };
    if name.is_empty() {
        return Err(format!("empty pipe name in `{raw}`"));
    }
    if path.is_empty() {
        return Err(format!("empty pipe path in `{raw}`"));
    }
    Ok(PipeSpec {
        name: name.to_owned(),
        path: PathBuf::from(path),
    })
}

/// Spawn the dedicated thread that drives poll rounds until cancellation.
///
/// Each round blocks at most `interval`, so the thread notices cancellation
/// within one interval of it being requested.
pub fn spawn_poller(
    registry: Arc<ReaderRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("timelane-poll".into())
        .spawn(move || {
            tracing::debug!(interval_ms = interval.as_millis() as u64, "poller thread started");
            while !cancel.is_cancelled() {
                registry.poll(interval, None);
            }
            tracing::debug!("poller thread stopped");
        })
}
