//! Round-trip statistics for the echo client.

use chrono::DateTime;
use std::fmt;

/// Running latency statistics, updated once per echoed message.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    processed: u64,
    cumulative_lag: i64,
    average_lag: f64,
    started_ms: i64,
}

impl Stats {
    /// Reset and record the start of a run.
    pub fn start(&mut self, now_ms: i64) {
        *self = Self {
            started_ms: now_ms,
            ..Self::default()
        };
    }

    /// Record one echoed message, returning the new average lag.
    pub fn record(&mut self, lag_ms: i64) -> f64 {
        self.processed += 1;
        self.cumulative_lag = self.cumulative_lag.saturating_add(lag_ms);
        self.average_lag = self.cumulative_lag as f64 / self.processed as f64;
        self.average_lag
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn cumulative_lag(&self) -> i64 {
        self.cumulative_lag
    }

    pub fn average_lag(&self) -> f64 {
        self.average_lag
    }

    pub fn started_ms(&self) -> i64 {
        self.started_ms
    }

    /// Messages per millisecond since the start.
    pub fn throughput(&self, now_ms: i64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.started_ms).max(1);
        self.processed as f64 / elapsed as f64
    }

    /// Freeze the statistics at `finished_ms`.
    pub fn summary(&self, finished_ms: i64) -> Summary {
        Summary {
            processed: self.processed,
            average_lag_ms: self.average_lag,
            started_ms: self.started_ms,
            finished_ms,
            runtime_ms: finished_ms.saturating_sub(self.started_ms),
            throughput: self.throughput(finished_ms),
        }
    }
}

/// Final statistics of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub processed: u64,
    pub average_lag_ms: f64,
    pub started_ms: i64,
    pub finished_ms: i64,
    pub runtime_ms: i64,
    /// Messages per millisecond.
    pub throughput: f64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final Message Processed")?;
        writeln!(f, "-------------------------------")?;
        writeln!(f, "*************Stats*************")?;
        writeln!(f, "-------------------------------")?;
        writeln!(f, "Total Messages  : {}", self.processed)?;
        writeln!(f, "Ave Lag         : {:.3}ms", self.average_lag_ms)?;
        writeln!(f, "Start Timestamp : {}", timestamp(self.started_ms))?;
        writeln!(f, "Final Timestamp : {}", timestamp(self.finished_ms))?;
        writeln!(f, "Runtime         : {}ms", self.runtime_ms)?;
        write!(f, "Throughput      : {:.3}msgs/ms", self.throughput)
    }
}

fn timestamp(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(at) => format!("{ms} ({})", at.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
        None => ms.to_string(),
    }
}
