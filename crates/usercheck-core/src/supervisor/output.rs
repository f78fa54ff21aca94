//! Captured service output.
//!
//! Each spawned service gets an [`OutputLog`]: a bounded ring buffer fed by
//! one capture task per pipe. Lines are also re-emitted as tracing events
//! under the `usercheck::service` target. The log outlives the process so
//! that a crash can be attached to the failure report.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default number of lines retained per service.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stream, self.line)
    }
}

/// Bounded, shareable ring buffer of output lines. Oldest lines are evicted
/// first once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct OutputLog {
    lines: Arc<Mutex<VecDeque<OutputLine>>>,
    capacity: usize,
}

impl OutputLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, stream: OutputStream, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(OutputLine {
            stream,
            line: line.into(),
        });
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<OutputLine> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Like [`Self::tail`], rendered as `[stream] line` strings.
    pub fn tail_strings(&self, n: usize) -> Vec<String> {
        self.tail(n).iter().map(ToString::to_string).collect()
    }

    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.tail(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

/// Read `reader` line by line into `log` until EOF.
pub(crate) fn spawn_capture<R>(
    reader: R,
    stream: OutputStream,
    pid: u32,
    log: OutputLog,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    info!(target: "usercheck::service", pid, stream = %stream, line = %line, "service output");
                    log.push(stream, line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(pid, stream = %stream, error = %e, "error reading service output");
                    break;
                }
            }
        }
    })
}
