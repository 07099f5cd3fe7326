//! Output relay - drains the child's merged stdout/stderr into the sink.
//!
//! Runs on its own OS thread per process generation. The read call blocks
//! only that thread; end-of-stream fires the completion channel exactly once.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;

use crate::console::{LogSource, Sink};

/// What the relay saw before the stream closed.
#[derive(Debug)]
pub struct RelaySummary {
    pub lines: u64,
    /// Set when the stream ended with a read error instead of EOF
    pub error: Option<io::Error>,
}

pub struct OutputRelay {
    sink: Arc<dyn Sink>,
}

impl OutputRelay {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Forward lines until the stream closes.
    ///
    /// Lines are split on `\n` and passed on with the newline still attached.
    /// Bytes that are not valid UTF-8 are replaced, never dropped.
    pub fn run<R: BufRead>(&self, mut reader: R) -> RelaySummary {
        let mut buf = Vec::with_capacity(256);
        let mut lines = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return RelaySummary { lines, error: None },
                Ok(_) => {
                    self.sink.append(LogSource::Process, &String::from_utf8_lossy(&buf));
                    lines += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !buf.is_empty() {
                        self.sink.append(LogSource::Process, &String::from_utf8_lossy(&buf));
                        lines += 1;
                    }
                    self.sink
                        .append(LogSource::System, &format!("Server output stream failed: {}\n", e));
                    return RelaySummary { lines, error: Some(e) };
                }
            }
        }
    }

    /// Run the relay on a dedicated thread.
    ///
    /// The receiver yields the summary once the stream closes. If the thread
    /// dies without sending, the receiver reports a closed channel.
    pub fn spawn<R>(self, reader: R, generation: u64) -> io::Result<oneshot::Receiver<RelaySummary>>
    where
        R: Read + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        thread::Builder::new()
            .name(format!("output-relay-{}", generation))
            .spawn(move || {
                let summary = self.run(BufReader::new(reader));
                tracing::debug!(
                    "Output relay for generation {} finished after {} lines",
                    generation,
                    summary.lines
                );
                let _ = done_tx.send(summary);
            })?;
        Ok(done_rx)
    }
}
