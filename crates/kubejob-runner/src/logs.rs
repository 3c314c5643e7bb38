//! Container output forwarding
//!
//! Log streaming is best effort: failing to open the stream or losing it
//! half way through only ends the stage, it never changes the result.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::client::JobClient;
use crate::submit::JobIdentity;

/// Destination for streamed container output
pub trait OutputSink: Send + Sync {
    /// Receive one line of output, without its line terminator
    fn write_line(&self, line: &str);
}

/// Writes each line to the process stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take the pipeline down with it
        let _ = writeln!(out, "{}", line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for BufferSink {
    fn write_line(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

/// Forward one raw log line with trailing whitespace trimmed
pub fn forward_log_line(sink: &dyn OutputSink, raw: &str) {
    sink.write_line(raw.trim_end());
}

/// Follow the pod's log until it closes.
///
/// Never fails: errors are logged and end the stage.
pub async fn stream_pod_logs(
    client: Arc<dyn JobClient>,
    job: JobIdentity,
    pod: String,
    container: Option<String>,
    sink: Arc<dyn OutputSink>,
) {
    debug!(job = %job.name, pod = %pod, "following pod log");
    match client
        .follow_logs(&job.namespace, &pod, container, sink)
        .await
    {
        Ok(lines) => debug!(job = %job.name, pod = %pod, lines, "pod log closed"),
        Err(e) => warn!(job = %job.name, pod = %pod, error = %e, "log streaming stopped"),
    }
}
