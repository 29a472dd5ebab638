//! Relays the inference server's stdout/stderr into the tracing sink.
//!
//! An unread pipe eventually fills and stalls the child, so both streams are
//! drained by their own task for as long as the child keeps them open.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity of a relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background tasks draining a child's output.
#[derive(Debug, Default)]
pub struct LogRelay {
    tasks: Vec<JoinHandle<u64>>,
}

impl LogRelay {
    /// Start relaying whichever of the two streams are present.
    pub fn spawn(name: &str, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            tasks.push(tokio::spawn(relay_lines(name.to_string(), StreamKind::Stdout, stdout)));
        }
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(relay_lines(name.to_string(), StreamKind::Stderr, stderr)));
        }
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every relay to reach end of stream, giving up after `timeout`.
    ///
    /// Returns the total number of lines relayed, or `None` if the wait timed out.
    pub async fn join(self, timeout: Duration) -> Option<u64> {
        let all = futures::future::join_all(self.tasks);
        match tokio::time::timeout(timeout, all).await {
            Ok(results) => Some(results.into_iter().filter_map(|r| r.ok()).sum()),
            Err(_) => {
                warn!("Log relays still open after {:?}; detaching", timeout);
                None
            }
        }
    }
}

/// Forward each line of `reader` until end of stream. Never fails.
pub async fn relay_lines<R>(name: String, stream: StreamKind, reader: R) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    let mut lines = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(
                    target: "sglang_worker::server",
                    server = %name,
                    stream = stream.as_str(),
                    "{}",
                    line
                );
                lines += 1;
            }
            Err(e) => {
                debug!(server = %name, stream = %stream, error = %e, "Log relay read failed");
                break;
            }
        }
    }

    debug!(server = %name, stream = %stream, lines = lines, "Log relay finished");
    lines
}
