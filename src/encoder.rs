//! Fixed-width channel encoding
//!
//! The storage schema declares one data source per (metric, channel slot).
//! The number of locked channels varies between fetches, so observed channels
//! are ranked by ascending channel id and packed into slots; unused slots are
//! written as unknown.
//!
//! Layout is metric-major: the first `max_channels` cells hold frequency for
//! slots `0..max_channels`, the next block holds snratio, and so on.

use crate::error::SurveyError;
use crate::types::{Cell, Metric, Row, SignalSnapshot};
use serde::{Deserialize, Serialize};

/// Channel capacity of the default storage schema
pub const DEFAULT_MAX_CHANNELS: usize = 16;

/// Metrics encoded per channel
pub const METRICS_PER_CHANNEL: usize = Metric::ALL.len();

/// What to do when a snapshot holds more channels than there are slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the lowest channel ids and drop the rest
    #[default]
    Truncate,
    /// Fail the encode
    Reject,
}

/// Encoder producing schema-stable rows
#[derive(Debug, Clone)]
pub struct ChannelEncoder {
    max_channels: usize,
    metrics_per_channel: usize,
    overflow: OverflowPolicy,
}

impl Default for ChannelEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHANNELS)
    }
}

impl ChannelEncoder {
    /// Create an encoder for `max_channels` slots and every known metric
    pub fn new(max_channels: usize) -> Self {
        Self {
            max_channels,
            metrics_per_channel: METRICS_PER_CHANNEL,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_metrics_per_channel(mut self, metrics_per_channel: usize) -> Self {
        self.metrics_per_channel = metrics_per_channel;
        self
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Number of cells in every encoded row
    pub fn width(&self) -> usize {
        self.max_channels * self.metrics_per_channel
    }

    /// Flatten a snapshot into `width()` cells
    pub fn flatten(&self, snapshot: &SignalSnapshot) -> Result<Vec<Cell>, SurveyError> {
        if snapshot.len() > self.max_channels {
            match self.overflow {
                OverflowPolicy::Truncate => {
                    log::warn!(
                        "snapshot has {} channels but schema holds {}, dropping channels {:?}",
                        snapshot.len(),
                        self.max_channels,
                        snapshot.channel_ids().skip(self.max_channels).collect::<Vec<_>>()
                    );
                }
                OverflowPolicy::Reject => {
                    return Err(SurveyError::Encoding(format!(
                        "snapshot has {} channels but schema holds {}",
                        snapshot.len(),
                        self.max_channels
                    )));
                }
            }
        }

        Ok(flatten(snapshot, self.max_channels, self.metrics_per_channel))
    }

    /// Encode a snapshot as a row stamped with `timestamp` (unix seconds)
    pub fn encode_row(&self, timestamp: i64, snapshot: &SignalSnapshot) -> Result<Row, SurveyError> {
        Ok(Row {
            timestamp,
            cells: self.flatten(snapshot)?,
        })
    }
}

/// Flatten `snapshot` into `max_channels * metrics_per_channel` cells.
///
/// Channels past `max_channels` (by ascending id) are dropped. Metric indices
/// beyond the known metrics are filled with [`Cell::Unknown`].
pub fn flatten(snapshot: &SignalSnapshot, max_channels: usize, metrics_per_channel: usize) -> Vec<Cell> {
    let mut cells = vec![Cell::Unknown; max_channels * metrics_per_channel];

    for (slot, record) in snapshot.channels().take(max_channels).enumerate() {
        for (metric_index, metric) in Metric::ALL.iter().take(metrics_per_channel).enumerate() {
            cells[metric_index * max_channels + slot] = Cell::Value(record.value(*metric));
        }
    }

    cells
}
