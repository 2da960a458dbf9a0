//! Surveyor CLI - collect cable modem downstream signal data
//!
//! Commands:
//! - run: Collect on an interval and append rows to the RRD file
//! - fetch: Fetch one snapshot and print it
//! - create: Create the RRD file for the configured schema

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::Instant;

use surveyor::config::PASSWORD_ENV;
use surveyor::{
    Account, ChannelEncoder, HttpTransport, RrdSchema, RrdStore, SurveyError, Surveyor,
    SurveyorConfig, TelemetryClient, TelemetryParser, SURVEYOR_VERSION,
};

/// Surveyor - downstream signal collector for HNAP cable modems
#[derive(Parser)]
#[command(name = "surveyor")]
#[command(version = SURVEYOR_VERSION)]
#[command(about = "Collect cable modem signal data into an RRD", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// HNAP endpoint of the modem
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Modem admin username
    #[arg(long, global = true)]
    username: Option<String>,

    /// Modem admin password
    #[arg(long, global = true, env = PASSWORD_ENV, hide_env_values = true)]
    password: Option<String>,

    /// Path to the RRD database
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Seconds between collections
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Channel slots in the RRD schema
    #[arg(long, global = true)]
    max_channels: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect on an interval until interrupted
    Run,

    /// Fetch one snapshot and print it
    Fetch {
        /// Output format
        #[arg(long, default_value = "json")]
        format: FetchFormat,
    },

    /// Create the RRD file if it does not exist
    Create,
}

#[derive(Clone, ValueEnum)]
enum FetchFormat {
    /// Pretty-printed JSON keyed by channel id
    Json,
    /// Encoded row as written to the RRD
    Row,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), SurveyError> {
    let config = resolve_config(cli.settings)?;

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::Fetch { format } => cmd_fetch(&config, format).await,
        Commands::Create => cmd_create(&config).await.map(|_| ()),
    }
}

fn resolve_config(settings: Settings) -> Result<SurveyorConfig, SurveyError> {
    let mut config = SurveyorConfig::load(settings.config.as_deref())?;

    if let Some(endpoint) = settings.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(username) = settings.username {
        config.username = username;
    }
    if let Some(password) = settings.password {
        config.password = password;
    }
    if let Some(data) = settings.data {
        config.data_path = data;
    }
    if let Some(interval) = settings.interval {
        config.interval_secs = interval;
    }
    if let Some(max_channels) = settings.max_channels {
        config.max_channels = max_channels;
    }

    Ok(config)
}

fn build_surveyor(config: &SurveyorConfig) -> Result<Surveyor<HttpTransport, RrdStore>, SurveyError> {
    config.validate()?;

    let timeouts = config.timeouts();
    let transport = HttpTransport::new(&config.endpoint, timeouts.fetch)?;
    let client = TelemetryClient::new(transport, Account::new(&config.username, &config.password))
        .with_parser(TelemetryParser::new(config.duplicate_channels));
    let encoder = ChannelEncoder::new(config.max_channels).with_overflow(config.channel_overflow);
    let store = rrd_store(config);
    store.schema().check_encoder(&encoder)?;

    Ok(Surveyor::new(client, encoder, store).with_timeouts(timeouts))
}

fn rrd_store(config: &SurveyorConfig) -> RrdStore {
    RrdStore::new(
        &config.data_path,
        RrdSchema::new(config.interval(), config.max_channels),
    )
}

async fn cmd_create(config: &SurveyorConfig) -> Result<bool, SurveyError> {
    let deadline = Instant::now() + Duration::from_secs(10);
    rrd_store(config).create_if_missing(deadline).await
}

async fn cmd_run(config: &SurveyorConfig) -> Result<(), SurveyError> {
    let mut surveyor = build_surveyor(config)?;
    log::info!(
        "starting surveyor: endpoint={:?} data={:?} interval={}s",
        surveyor.client().transport().endpoint(),
        surveyor.sink().path(),
        config.interval_secs
    );

    cmd_create(config).await?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("received signal, exiting"),
            Err(e) => {
                log::error!("error listening for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    surveyor.run_until(config.interval(), shutdown).await;
    Ok(())
}

async fn cmd_fetch(config: &SurveyorConfig, format: FetchFormat) -> Result<(), SurveyError> {
    let mut surveyor = build_surveyor(config)?;
    let started_at = Utc::now();
    let snapshot = surveyor.snapshot().await?;

    match format {
        FetchFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        FetchFormat::Row => {
            let row = surveyor.encoder().encode_row(started_at.timestamp(), &snapshot)?;
            println!("{row}");
        }
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SurveyError> for CliError {
    fn from(e: SurveyError) -> Self {
        let (code, hint) = match &e {
            SurveyError::Config(_) => ("CONFIG_ERROR", Some("Check the config file and flags")),
            SurveyError::Transport { .. } | SurveyError::Timeout(_) => (
                "TRANSPORT_ERROR",
                Some("Check that the modem is reachable at the configured endpoint"),
            ),
            SurveyError::SessionExpired => ("SESSION_ERROR", Some("Check the username and password")),
            SurveyError::Protocol { .. } => ("PROTOCOL_ERROR", None),
            SurveyError::Decode(_) | SurveyError::Json(_) => ("DECODE_ERROR", None),
            SurveyError::Encoding(_) => ("ENCODING_ERROR", Some("Increase --max-channels")),
            SurveyError::Storage(_) => ("STORAGE_ERROR", Some("Check that rrdtool is installed")),
        };

        CliError {
            code: code.to_string(),
            message: e.to_string(),
            hint: hint.map(str::to_string),
        }
    }
}
