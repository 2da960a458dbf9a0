//! Round-robin database collaborator
//!
//! Declares the fixed-width RRD schema that encoded rows are written into and
//! drives the external `rrdtool` binary to create the file and append rows.
//!
//! Archive layout, assuming 5s steps and graphs around 500 points wide:
//!
//! ```text
//! RRA:*:0.5:1:180    -  15m @  5s
//! RRA:*:0.5:4:540    -   3h @ 20s
//! RRA:*:0.5:60:360   -  30h @  5m
//! RRA:*:0.5:360:480  -  10d @ 30m
//! RRA:*:0.5:720:9600 - 400d @  1h
//! ```
//!
//! Each archive is kept for AVERAGE, MIN and MAX.

use crate::encoder::ChannelEncoder;
use crate::error::SurveyError;
use crate::types::{Metric, Row, UNKNOWN_MARKER};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// Consolidation functions kept for every archive
const CONSOLIDATIONS: [&str; 3] = ["AVERAGE", "MIN", "MAX"];

/// `(steps per row, rows)` for each archive
const ARCHIVES: [(u32, u32); 5] = [(1, 180), (4, 540), (60, 360), (360, 480), (720, 9600)];

/// Receives encoded rows
pub trait RowSink {
    fn write_row(&self, row: &Row, deadline: Instant) -> impl Future<Output = Result<(), SurveyError>> + Send;
}

/// Fixed-width schema: one data source per metric and channel slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrdSchema {
    pub step: Duration,
    pub heartbeat: Duration,
    pub max_channels: usize,
}

impl RrdSchema {
    /// Schema with a heartbeat of two steps
    pub fn new(step: Duration, max_channels: usize) -> Self {
        Self {
            step,
            heartbeat: step * 2,
            max_channels,
        }
    }

    /// `DS:` definitions in row order (metric-major, channel-minor)
    pub fn data_sources(&self) -> Vec<String> {
        let heartbeat = self.heartbeat.as_secs();
        Metric::ALL
            .iter()
            .flat_map(|metric| {
                let (kind, min) = if metric.is_counter() {
                    ("COUNTER", "0")
                } else {
                    ("GAUGE", UNKNOWN_MARKER)
                };
                (0..self.max_channels).map(move |slot| {
                    format!("DS:{metric}{slot}:{kind}:{heartbeat}:{min}:{UNKNOWN_MARKER}")
                })
            })
            .collect()
    }

    /// `RRA:` definitions
    pub fn archives(&self) -> Vec<String> {
        ARCHIVES
            .iter()
            .flat_map(|(steps, rows)| {
                CONSOLIDATIONS
                    .iter()
                    .map(move |cf| format!("RRA:{cf}:0.5:{steps}:{rows}"))
            })
            .collect()
    }

    /// Number of data sources, and so the number of cells a row must carry
    pub fn width(&self) -> usize {
        self.max_channels * Metric::ALL.len()
    }

    /// Fail unless `encoder` produces rows exactly as wide as this schema
    pub fn check_encoder(&self, encoder: &ChannelEncoder) -> Result<(), SurveyError> {
        if encoder.width() != self.width() {
            return Err(SurveyError::Config(format!(
                "encoder produces {} cells per row but the database declares {} data sources",
                encoder.width(),
                self.width()
            )));
        }
        Ok(())
    }

    /// Arguments for `rrdtool create`
    pub fn create_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            path.display().to_string(),
            "--step".to_string(),
            self.step.as_secs().to_string(),
        ];
        args.extend(self.data_sources());
        args.extend(self.archives());
        args
    }
}

/// RRD file managed through the `rrdtool` command
#[derive(Debug, Clone)]
pub struct RrdStore {
    path: PathBuf,
    schema: RrdSchema,
    binary: String,
}

impl RrdStore {
    pub fn new(path: impl Into<PathBuf>, schema: RrdSchema) -> Self {
        Self {
            path: path.into(),
            schema,
            binary: "rrdtool".to_string(),
        }
    }

    /// Use a different rrdtool executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RrdSchema {
        &self.schema
    }

    /// Create the database unless the file already exists.
    ///
    /// Returns `true` if a new file was created.
    pub async fn create_if_missing(&self, deadline: Instant) -> Result<bool, SurveyError> {
        if tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| SurveyError::Storage(format!("error checking {}: {e}", self.path.display())))?
        {
            log::debug!("database {} already exists", self.path.display());
            return Ok(false);
        }

        let args = self.schema.create_args(&self.path);
        self.run(&args, deadline)
            .await
            .map_err(|e| SurveyError::Storage(format!("error creating database: {e}")))?;
        log::info!("created database {}", self.path.display());
        Ok(true)
    }

    async fn run(&self, args: &[String], deadline: Instant) -> Result<(), String> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("error starting {}: {e}", self.binary))?;

        let output = timeout_at(deadline, child.wait_with_output())
            .await
            .map_err(|_| format!("{} timed out", self.binary))?
            .map_err(|e| format!("error waiting for {}: {e}", self.binary))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{}\n{}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl RowSink for RrdStore {
    async fn write_row(&self, row: &Row, deadline: Instant) -> Result<(), SurveyError> {
        let expected = self.schema.width();
        if row.cells.len() != expected {
            return Err(SurveyError::Storage(format!(
                "row has {} cells but the schema declares {expected}",
                row.cells.len()
            )));
        }

        let joined = row.to_string();
        log::debug!("write: {joined}");

        let args = ["update".to_string(), self.path.display().to_string(), joined];
        self.run(&args, deadline)
            .await
            .map_err(|e| SurveyError::Storage(format!("error updating database: {e}\n{args:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;
    use pretty_assertions::assert_eq;

    fn schema() -> RrdSchema {
        RrdSchema::new(Duration::from_secs(5), 2)
    }

    #[test]
    fn test_data_sources_follow_row_order() {
        assert_eq!(
            schema().data_sources(),
            vec![
                "DS:frequency0:GAUGE:10:U:U",
                "DS:frequency1:GAUGE:10:U:U",
                "DS:snratio0:GAUGE:10:U:U",
                "DS:snratio1:GAUGE:10:U:U",
                "DS:powerlevel0:GAUGE:10:U:U",
                "DS:powerlevel1:GAUGE:10:U:U",
                "DS:correctable0:COUNTER:10:0:U",
                "DS:correctable1:COUNTER:10:0:U",
                "DS:uncorrectable0:COUNTER:10:0:U",
                "DS:uncorrectable1:COUNTER:10:0:U",
            ]
        );
    }

    #[test]
    fn test_archives() {
        let archives = schema().archives();
        assert_eq!(archives.len(), 15);
        assert_eq!(archives[0], "RRA:AVERAGE:0.5:1:180");
        assert_eq!(archives[2], "RRA:MAX:0.5:1:180");
        assert_eq!(archives[14], "RRA:MAX:0.5:720:9600");
    }

    #[test]
    fn test_create_args() {
        let args = schema().create_args(Path::new("surveyor.rrd"));
        assert_eq!(&args[..4], &["create", "surveyor.rrd", "--step", "5"]);
        assert_eq!(args.len(), 4 + schema().width() + 15);
    }

    #[test]
    fn test_schema_matches_encoder_width() {
        let schema = schema();
        assert_eq!(schema.width(), schema.data_sources().len());
        assert!(schema.check_encoder(&ChannelEncoder::new(2)).is_ok());
    }

    #[test]
    fn test_schema_rejects_mismatched_encoder() {
        let schema = schema();

        let err = schema.check_encoder(&ChannelEncoder::new(3)).unwrap_err();
        assert!(matches!(err, SurveyError::Config(_)));
        assert!(err.to_string().contains("15 cells"), "{err}");

        let narrow = ChannelEncoder::new(2).with_metrics_per_channel(4);
        assert!(schema.check_encoder(&narrow).is_err());
    }

    #[tokio::test]
    async fn test_write_rejects_wrong_width() {
        let store = RrdStore::new("unused.rrd", schema());
        let row = Row {
            timestamp: 1,
            cells: vec![Cell::Unknown; 3],
        };

        let err = store
            .write_row(&row, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 cells"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_storage_error() {
        let store = RrdStore::new("unused.rrd", schema()).with_binary("surveyor-no-such-rrdtool");
        let row = Row {
            timestamp: 1,
            cells: vec![Cell::Unknown; 10],
        };

        let err = store
            .write_row(&row, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SurveyError::Storage(_)));
    }
}
