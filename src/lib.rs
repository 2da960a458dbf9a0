//! Surveyor - downstream signal collector for HNAP cable modems
//!
//! Surveyor logs in to a modem's HNAP management interface, fetches the
//! downstream channel table and encodes it into a fixed-width row for a
//! round-robin database: handshake → signed fetch → parse → encode → store.
//!
//! ## Modules
//!
//! - **Session**: challenge-response login and per-request signing
//! - **Client**: fetch with one automatic session renewal
//! - **Parser / Encoder**: channel blob to snapshot to schema-stable row
//! - **RRD**: schema declaration and `rrdtool` writer

pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod hash;
pub mod hnap;
pub mod parser;
pub mod pipeline;
pub mod rrd;
pub mod session;
pub mod transport;
pub mod types;

pub use client::TelemetryClient;
pub use config::SurveyorConfig;
pub use encoder::{flatten, ChannelEncoder, OverflowPolicy};
pub use error::SurveyError;
pub use hash::calculate_keyed_hash;
pub use parser::{parse_channel_infos, DuplicatePolicy, TelemetryParser};
pub use pipeline::{CycleTimeouts, Surveyor};
pub use rrd::{RowSink, RrdSchema, RrdStore};
pub use session::{Account, AuthSession, Credentials};
pub use transport::{HttpTransport, Transport};
pub use types::{Cell, ChannelRecord, Metric, Row, SignalSnapshot};

/// Surveyor version
pub const SURVEYOR_VERSION: &str = env!("CARGO_PKG_VERSION");
