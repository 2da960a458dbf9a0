//! Pipeline orchestration
//!
//! One collection cycle: fetch telemetry from the modem, encode it into a
//! fixed-width row and hand the row to the store.

use crate::client::TelemetryClient;
use crate::encoder::ChannelEncoder;
use crate::error::SurveyError;
use crate::rrd::RowSink;
use crate::transport::Transport;
use crate::types::{Row, SignalSnapshot};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Deadlines for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimeouts {
    /// Budget for the whole fetch, handshake included
    pub fetch: Duration,
    pub write: Duration,
}

impl Default for CycleTimeouts {
    fn default() -> Self {
        // A fetch takes just under 3s on a busy modem.
        Self {
            fetch: Duration::from_secs(5),
            write: Duration::from_secs(1),
        }
    }
}

/// Stateful collector: keeps the modem session between cycles.
pub struct Surveyor<T, S> {
    client: TelemetryClient<T>,
    encoder: ChannelEncoder,
    sink: S,
    timeouts: CycleTimeouts,
}

impl<T: Transport, S: RowSink> Surveyor<T, S> {
    pub fn new(client: TelemetryClient<T>, encoder: ChannelEncoder, sink: S) -> Self {
        Self {
            client,
            encoder,
            sink,
            timeouts: CycleTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn client(&self) -> &TelemetryClient<T> {
        &self.client
    }

    pub fn encoder(&self) -> &ChannelEncoder {
        &self.encoder
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Fetch a snapshot without encoding or storing it
    pub async fn snapshot(&mut self) -> Result<SignalSnapshot, SurveyError> {
        let deadline = Instant::now() + self.timeouts.fetch;
        self.client.get_signal_data(deadline).await
    }

    /// Run one cycle. The row is stamped with `started_at`.
    pub async fn run_once(&mut self, started_at: DateTime<Utc>) -> Result<Row, SurveyError> {
        let snapshot = self.snapshot().await?;
        log::debug!("fetched {} channels", snapshot.len());

        let row = self.encoder.encode_row(started_at.timestamp(), &snapshot)?;

        let deadline = Instant::now() + self.timeouts.write;
        self.sink.write_row(&row, deadline).await?;
        Ok(row)
    }

    /// Run a cycle every `interval` until `shutdown` resolves, returning the
    /// number of cycles started. Failed cycles are logged and skipped.
    ///
    /// `shutdown` is polled across cycles, so a request that arrives while a
    /// cycle is running stops the loop once that cycle finishes.
    pub async fn run_until<F>(&mut self, interval: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = std::pin::pin!(shutdown);
        let mut cycles = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("shutting down after {cycles} cycles");
                    return cycles;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    match self.run_once(Utc::now()).await {
                        Ok(row) => log::debug!("wrote {} cells", row.cells.len()),
                        Err(e) => log::error!("error collecting signal data: {e}"),
                    }
                }
            }
        }
    }
}
