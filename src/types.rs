//! Core types for the Surveyor pipeline
//!
//! This module defines the data structures that flow through each stage:
//! parsed channel records, the per-fetch snapshot, the encoded cells and the
//! row handed to the time-series store.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// Downstream channel metric, in the order the storage schema declares them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Frequency,
    SnRatio,
    PowerLevel,
    Correctable,
    Uncorrectable,
}

impl Metric {
    /// All metrics in schema order
    pub const ALL: [Metric; 5] = [
        Metric::Frequency,
        Metric::SnRatio,
        Metric::PowerLevel,
        Metric::Correctable,
        Metric::Uncorrectable,
    ];

    /// Data source name prefix used in the storage schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Frequency => "frequency",
            Metric::SnRatio => "snratio",
            Metric::PowerLevel => "powerlevel",
            Metric::Correctable => "correctable",
            Metric::Uncorrectable => "uncorrectable",
        }
    }

    /// Codeword totals only ever grow; the rest are point-in-time readings.
    pub fn is_counter(&self) -> bool {
        matches!(self, Metric::Correctable | Metric::Uncorrectable)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downstream channel as reported by the modem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// DOCSIS channel id (unique within a snapshot)
    pub channel_id: u32,
    /// Lock status text, e.g. "Locked"
    pub lock_status: String,
    /// Modulation text, e.g. "QAM256"
    pub modulation: String,
    /// Center frequency (Hz), never negative
    pub frequency: i64,
    /// Signal to noise ratio (dB)
    pub snr: i32,
    /// Power level (dBmV), may be negative
    pub power_level: i32,
    /// Total correctable codewords, never negative
    pub correctable: i64,
    /// Total uncorrectable codewords, never negative
    pub uncorrectable: i64,
}

impl ChannelRecord {
    /// Numeric value of a metric for this channel
    pub fn value(&self, metric: Metric) -> i64 {
        match metric {
            Metric::Frequency => self.frequency,
            Metric::SnRatio => i64::from(self.snr),
            Metric::PowerLevel => i64::from(self.power_level),
            Metric::Correctable => self.correctable,
            Metric::Uncorrectable => self.uncorrectable,
        }
    }
}

/// All channels from a single fetch, keyed and ordered by channel id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalSnapshot {
    channels: BTreeMap<u32, ChannelRecord>,
}

impl SignalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record keyed by its channel id, returning any record it replaced
    pub fn insert(&mut self, record: ChannelRecord) -> Option<ChannelRecord> {
        self.channels.insert(record.channel_id, record)
    }

    pub fn get(&self, channel_id: u32) -> Option<&ChannelRecord> {
        self.channels.get(&channel_id)
    }

    pub fn contains(&self, channel_id: u32) -> bool {
        self.channels.contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Records in ascending channel id order
    pub fn channels(&self) -> btree_map::Values<'_, u32, ChannelRecord> {
        self.channels.values()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.channels.keys().copied()
    }
}

impl FromIterator<ChannelRecord> for SignalSnapshot {
    fn from_iter<I: IntoIterator<Item = ChannelRecord>>(iter: I) -> Self {
        let mut snapshot = SignalSnapshot::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

/// One slot of an encoded row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Value(i64),
    /// Missing reading, written as the storage engine's unknown marker
    Unknown,
}

/// Marker the storage engine reads as "no data"
pub const UNKNOWN_MARKER: &str = "U";

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(v) => write!(f, "{v}"),
            Cell::Unknown => f.write_str(UNKNOWN_MARKER),
        }
    }
}

/// Fixed-width row ready for the time-series store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Unix timestamp (seconds) the fetch started at
    pub timestamp: i64,
    pub cells: Vec<Cell>,
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp)?;
        for cell in &self.cells {
            write!(f, ":{cell}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(channel_id: u32) -> ChannelRecord {
        ChannelRecord {
            channel_id,
            lock_status: "Locked".to_string(),
            modulation: "QAM256".to_string(),
            frequency: 651_000_000,
            snr: 31,
            power_level: -3,
            correctable: 10,
            uncorrectable: 2,
        }
    }

    #[test]
    fn test_snapshot_orders_by_channel_id() {
        let snapshot: SignalSnapshot = [record(13), record(2), record(7)].into_iter().collect();
        let ids: Vec<u32> = snapshot.channel_ids().collect();
        assert_eq!(ids, vec![2, 7, 13]);
    }

    #[test]
    fn test_metric_values() {
        let r = record(1);
        assert_eq!(r.value(Metric::Frequency), 651_000_000);
        assert_eq!(r.value(Metric::PowerLevel), -3);
        assert_eq!(r.value(Metric::Uncorrectable), 2);
    }

    #[test]
    fn test_row_rendering() {
        let row = Row {
            timestamp: 1710688116,
            cells: vec![Cell::Value(41), Cell::Value(-2), Cell::Unknown],
        };
        assert_eq!(row.to_string(), "1710688116:41:-2:U");
    }

    #[test]
    fn test_snapshot_serializes_as_map() {
        let snapshot: SignalSnapshot = [record(3)].into_iter().collect();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["3"]["frequency"], 651_000_000);
    }
}
