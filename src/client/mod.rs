//! Throughput-oriented echo client.
//!
//! Streams every line of a source as a frame and measures the round-trip
//! lag of each echo. Frames are queued as fast as the output buffer
//! allows rather than one at a time, so throughput matters more than
//! per-message latency.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting --on_connect--> Streaming --source exhausted,
//!                                        output flushed--> Draining
//! Draining --final sequence echoed--> Done
//! ```

mod stats;

pub use stats::{Stats, Summary};

use crate::error::{ClientError, ConnectionError};
use crate::protocol::{append_frame, decode, now_millis, Append, Message};
use crate::runtime::{
    Buffer, Connection, Control, EventLoop, FlushOutcome, Interest, Listener, LoopConfig,
    ReadOutcome,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{debug, error, info, trace, warn};

/// Client progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Streaming,
    Draining,
    Done,
}

/// Event loop driver for one client connection.
pub struct EchoClient<I> {
    lines: I,
    /// Line pulled from the source that did not fit the output buffer yet.
    pending: Option<String>,
    /// Sequence number of the most recently pulled line.
    last_sequence: u64,
    /// Set once the source is exhausted.
    final_sequence: Option<u64>,
    phase: Phase,
    stats: Stats,
    outcome: Option<Result<Summary, ClientError>>,
}

impl<I> EchoClient<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            pending: None,
            last_sequence: 0,
            final_sequence: None,
            phase: Phase::Connecting,
            stats: Stats::default(),
            outcome: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Final sequence number, known once the source is exhausted.
    pub fn final_sequence(&self) -> Option<u64> {
        self.final_sequence
    }

    /// Consume the driver, returning how the run ended.
    pub fn finish(self) -> Result<Summary, ClientError> {
        self.outcome.unwrap_or(Err(ClientError::Incomplete {
            processed: self.stats.processed(),
        }))
    }

    /// Frame source lines into `out` until it is full or the source ends.
    fn fill_output(&mut self, out: &mut Buffer) -> Result<(), ClientError> {
        loop {
            if self.pending.is_none() {
                if self.final_sequence.is_some() {
                    return Ok(());
                }
                match self.lines.next() {
                    Some(Ok(line)) => {
                        self.last_sequence += 1;
                        self.pending = Some(line);
                    }
                    Some(Err(e)) => return Err(ClientError::Source(e)),
                    None => {
                        self.final_sequence = Some(self.last_sequence);
                        info!(final_sequence = self.last_sequence, "Source exhausted");
                        return Ok(());
                    }
                }
            }

            let line = self.pending.as_deref().unwrap_or_default();
            match append_frame(out, self.last_sequence, line.as_bytes())? {
                Append::Written(_) => self.pending = None,
                Append::Full => return Ok(()),
            }
        }
    }

    /// Account for one echoed message; true once it is the final one.
    fn record_echo(&mut self, msg: &Message, now_ms: i64) -> bool {
        // The timestamp comes from the wire and may be anything
        let lag = now_ms.saturating_sub(msg.sent_timestamp);
        let average = self.stats.record(lag);
        debug!(
            sequence = msg.sequence,
            lag,
            average,
            throughput = self.stats.throughput(now_ms),
            data = %msg.payload_str(),
            "Echo received"
        );
        Some(msg.sequence) == self.final_sequence
    }

    fn complete(&mut self, conn: &mut Connection<()>, ctl: &mut Control) {
        let summary = self.stats.summary(now_millis());
        info!(
            processed = summary.processed,
            average_lag_ms = summary.average_lag_ms,
            runtime_ms = summary.runtime_ms,
            "Final message processed"
        );
        self.outcome = Some(Ok(summary));
        self.shutdown(conn, ctl);
    }

    fn fail(&mut self, conn: &mut Connection<()>, ctl: &mut Control, err: ClientError) {
        error!(peer = %conn.peer_addr(), error = %err, "Client run failed");
        self.outcome = Some(Err(err));
        self.shutdown(conn, ctl);
    }

    fn shutdown(&mut self, conn: &mut Connection<()>, ctl: &mut Control) {
        self.phase = Phase::Done;
        info!(peer = %conn.peer_addr(), "Disconnecting from server");
        conn.close();
        ctl.stop();
    }
}

impl<I> Listener for EchoClient<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Attachment = ();

    fn on_connect(&mut self, _conn: &mut Connection<()>, _ctl: &mut Control) {
        self.stats.start(now_millis());
        self.phase = Phase::Streaming;
    }

    fn on_write(&mut self, conn: &mut Connection<()>, ctl: &mut Control) {
        if !matches!(self.phase, Phase::Streaming | Phase::Draining) {
            return;
        }

        if let Err(e) = self.fill_output(conn.output_mut()) {
            return self.fail(conn, ctl, e);
        }

        match conn.flush_output() {
            Ok(FlushOutcome::Partial(n)) => trace!(written = n, "Partial write"),
            Ok(outcome) => trace!(?outcome, "Flushed"),
            Err(e) => return self.fail(conn, ctl, e.into()),
        }

        let Some(final_sequence) = self.final_sequence else {
            return;
        };
        if self.phase == Phase::Streaming && self.pending.is_none() && conn.output().is_empty() {
            if final_sequence == 0 {
                // Nothing was ever sent, so nothing will come back
                return self.complete(conn, ctl);
            }
            debug!(final_sequence, "All frames written, draining echoes");
            self.phase = Phase::Draining;
            conn.set_interest(Interest::READABLE);
        }
    }

    fn on_read(&mut self, conn: &mut Connection<()>, ctl: &mut Control) {
        if self.phase == Phase::Done {
            return;
        }

        match conn.fill_input() {
            Ok(ReadOutcome::Read(_)) => {}
            Ok(ReadOutcome::Pending) => return,
            Ok(ReadOutcome::Eof) => return self.fail(conn, ctl, ConnectionError::PeerClosed.into()),
            Err(e) => return self.fail(conn, ctl, e.into()),
        }

        let mut finished = false;
        let mut fatal = None;

        for frame in decode(conn.input_mut()) {
            match frame {
                Ok(msg) => {
                    if self.record_echo(&msg, now_millis()) {
                        finished = true;
                        break;
                    }
                }
                Err(e) if e.is_fatal() => {
                    fatal = Some(e);
                    break;
                }
                Err(e) => warn!(error = %e, "Discarding frame"),
            }
        }

        if let Some(e) = fatal {
            self.fail(conn, ctl, e.into());
        } else if finished {
            self.complete(conn, ctl);
        }
    }
}

/// Open a file as a line source.
pub fn open_lines(
    path: &Path,
) -> Result<impl Iterator<Item = io::Result<String>>, ClientError> {
    let file = File::open(path).map_err(|source| ClientError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

/// Stream `lines` to the echo server at `addr` and wait for every echo.
pub fn run<I>(addr: SocketAddr, lines: I, config: LoopConfig) -> Result<Summary, ClientError>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut event_loop = EventLoop::new(EchoClient::new(lines), config)?;
    event_loop.connect(addr)?;
    event_loop.run()?;
    event_loop.into_listener().finish()
}
