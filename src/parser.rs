//! Downstream channel blob parsing
//!
//! The modem reports every downstream channel in a single string:
//!
//! ```text
//! 1^Locked^QAM256^13^723000000^7^29^53513438^417213^|+|2^Locked^QAM256^1^651000000^7^31^2895843^340003^
//! ```
//!
//! Records are separated by `|+|`, fields by `^`, and each record may carry a
//! trailing `^`.

use crate::error::SurveyError;
use crate::types::{ChannelRecord, SignalSnapshot};
use std::str::FromStr;

/// Separator between channel records
pub const RECORD_DELIMITER: &str = "|+|";

/// Separator between fields of one record
pub const FIELD_SEPARATOR: char = '^';

/// Number of positional fields in a record
pub const FIELD_COUNT: usize = 9;

const ID_FIELD: usize = 0;
const LOCK_STATUS_FIELD: usize = 1;
const MODULATION_FIELD: usize = 2;
const CHANNEL_ID_FIELD: usize = 3;
const FREQUENCY_FIELD: usize = 4;
const POWER_LEVEL_FIELD: usize = 5;
const SNR_FIELD: usize = 6;
const CORRECTABLE_FIELD: usize = 7;
const UNCORRECTABLE_FIELD: usize = 8;

/// What to do when two records report the same channel id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Later record replaces the earlier one
    #[default]
    LastWins,
    /// Fail the whole parse
    Reject,
}

/// Parser for the delimited downstream channel blob
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryParser {
    duplicates: DuplicatePolicy,
}

impl TelemetryParser {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self { duplicates }
    }

    /// Parse a raw blob into a snapshot. Any malformed record fails the whole parse.
    pub fn parse(&self, raw: &str) -> Result<SignalSnapshot, SurveyError> {
        let mut snapshot = SignalSnapshot::new();

        for record in raw.split(RECORD_DELIMITER) {
            let parsed = parse_record(record)?;
            let channel_id = parsed.channel_id;

            if snapshot.insert(parsed).is_some() {
                match self.duplicates {
                    DuplicatePolicy::LastWins => {
                        log::warn!("duplicate channel id {channel_id}, keeping the later record");
                    }
                    DuplicatePolicy::Reject => {
                        return Err(SurveyError::Decode(format!(
                            "duplicate channel id {channel_id} in record {record:?}"
                        )));
                    }
                }
            }
        }

        Ok(snapshot)
    }
}

/// Parse a raw blob with the default (last wins) duplicate handling.
pub fn parse_channel_infos(raw: &str) -> Result<SignalSnapshot, SurveyError> {
    TelemetryParser::default().parse(raw)
}

fn parse_record(record: &str) -> Result<ChannelRecord, SurveyError> {
    let trimmed = record.strip_suffix(FIELD_SEPARATOR).unwrap_or(record);
    let fields: Vec<&str> = trimmed.split(FIELD_SEPARATOR).collect();

    if fields.len() != FIELD_COUNT {
        return Err(SurveyError::Decode(format!(
            "invalid record, expected {FIELD_COUNT} fields, got {}: {trimmed:?}",
            fields.len()
        )));
    }

    log::trace!("parsing record {} for channel {}", fields[ID_FIELD], fields[CHANNEL_ID_FIELD]);

    Ok(ChannelRecord {
        channel_id: numeric_field(&fields, CHANNEL_ID_FIELD, "channel id", trimmed)?,
        lock_status: fields[LOCK_STATUS_FIELD].to_string(),
        modulation: fields[MODULATION_FIELD].to_string(),
        frequency: non_negative_field(&fields, FREQUENCY_FIELD, "frequency", trimmed)?,
        snr: numeric_field(&fields, SNR_FIELD, "snratio", trimmed)?,
        power_level: numeric_field(&fields, POWER_LEVEL_FIELD, "power level", trimmed)?,
        correctable: non_negative_field(&fields, CORRECTABLE_FIELD, "correctable", trimmed)?,
        uncorrectable: non_negative_field(&fields, UNCORRECTABLE_FIELD, "uncorrectable", trimmed)?,
    })
}

fn numeric_field<T>(fields: &[&str], index: usize, name: &str, record: &str) -> Result<T, SurveyError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = fields[index];
    raw.parse::<T>().map_err(|e| {
        SurveyError::Decode(format!("error parsing {name} {raw:?} in record {record:?}: {e}"))
    })
}

/// Frequencies and codeword totals are stored as signed 64-bit values, so
/// anything above `i64::MAX` fails here instead of wrapping in the row.
fn non_negative_field(fields: &[&str], index: usize, name: &str, record: &str) -> Result<i64, SurveyError> {
    let value: i64 = numeric_field(fields, index, name, record)?;
    if value < 0 {
        return Err(SurveyError::Decode(format!(
            "negative {name} {value} in record {record:?}"
        )));
    }
    Ok(value)
}
