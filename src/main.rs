use chrono::{Days, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use followwatch::config::Config;
use followwatch::error::{ErrorRecovery, FollowwatchError};
use followwatch::governor::RateGovernor;
use followwatch::pipeline::{Pipeline, PipelineSettings, RunMode};
use followwatch::report::{self, ReportFormat, RunOutcome};
use followwatch::store::JsonFileStore;
use followwatch::twitter::TwitterClient;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "followwatch")]
#[command(about = "Reports accounts newly followed by several members of a curated list")]
#[command(version)]
struct Cli {
    /// Path to configuration file (can also be set via FOLLOWWATCH_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable verbose logging (equivalent to --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Collect today's snapshots, then compare and rank (default)
    Run(RunArgs),
    /// Only collect and store snapshots
    Collect(RunArgs),
    /// Only compare stored snapshots and rank
    Compare(RunArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
struct RunArgs {
    /// Snapshot date (YYYY-MM-DD); defaults to today minus collection.date_lag_days
    #[arg(long, value_name = "DATE")]
    date: Option<NaiveDate>,

    /// Days between the compared snapshots, overriding collection.window_days
    #[arg(long, value_name = "DAYS")]
    window_days: Option<u32>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

impl Cli {
    /// Get config path from CLI arg or FOLLOWWATCH_CONFIG environment variable
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var("FOLLOWWATCH_CONFIG").ok().map(PathBuf::from))
    }

    fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}

impl Command {
    fn mode(&self) -> RunMode {
        match self {
            Command::Run(_) => RunMode::Full,
            Command::Collect(_) => RunMode::CollectOnly,
            Command::Compare(_) => RunMode::CompareOnly,
        }
    }

    fn args(&self) -> &RunArgs {
        match self {
            Command::Run(args) | Command::Collect(args) | Command::Compare(args) => args,
        }
    }
}

/// Logical snapshot date: the explicit one, or today shifted back by the configured lag
fn resolve_date(explicit: Option<NaiveDate>, today: NaiveDate, lag_days: u32) -> NaiveDate {
    explicit.unwrap_or_else(|| {
        today
            .checked_sub_days(Days::new(u64::from(lag_days)))
            .unwrap_or(today)
    })
}

/// Initialize structured logging on stderr so reports on stdout stay clean
#[allow(clippy::result_large_err)]
fn init_logging(config: &Config, cli: &Cli) -> Result<(), FollowwatchError> {
    let log_level = if cli.verbose {
        "debug"
    } else if let Some(ref level) = cli.log_level {
        level.as_str()
    } else {
        config.log_level()
    };

    let _level = match log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => {
            return Err(FollowwatchError::InvalidData(format!(
                "Invalid log level: {log_level}. Valid levels are: error, warn, info, debug, trace"
            )));
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| FollowwatchError::InvalidData(format!("Failed to create log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();

    debug!("Logging initialized with level: {}", log_level);
    Ok(())
}

/// Log an error at the level its kind deserves
fn handle_error(error: &FollowwatchError) {
    match error {
        FollowwatchError::Config(_) => {
            error!("Configuration error: {}", error);
            error!("Please check your configuration file and environment variables");
        }
        FollowwatchError::Upstream(_) | FollowwatchError::Network(_) => {
            error!("Upstream API error: {}", error);
            if ErrorRecovery::is_recoverable(error) {
                info!("The error is transient, the next scheduled run may succeed");
            }
        }
        FollowwatchError::Snapshot(_) => {
            error!("Snapshot storage error: {}", error);
            error!("Check that the data directory exists and is writable");
        }
        FollowwatchError::Shutdown => {
            warn!("Run interrupted; snapshots saved so far are kept");
        }
        _ => {
            error!("Application error: {}", error);
            debug!("Error details: {:?}", error);
        }
    }

    if ErrorRecovery::should_shutdown(error) {
        error!("Fatal error encountered, aborting run");
    }
}

#[tokio::main]
#[allow(clippy::result_large_err)]
async fn main() -> Result<(), FollowwatchError> {
    let cli = Cli::parse();
    let started = Instant::now();

    let config = match Config::load(cli.config_path()) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            let error = FollowwatchError::Config(e);
            handle_error(&error);
            return Err(error);
        }
    };

    if let Err(e) = init_logging(&config, &cli) {
        eprintln!("Failed to initialize logging: {e}");
        return Err(e);
    }

    info!("Starting followwatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration file path: {:?}", cli.config_path());
    info!("Tracking members of list {}", config.twitter.list_id);
    info!("Snapshots stored in {}", config.data_dir().display());

    let command = cli.command();

    let result = tokio::select! {
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, stopping run");
            Err(FollowwatchError::Shutdown)
        }
        result = run_application(&config, &command) => result,
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            handle_error(&e);
            return Err(e);
        }
    };

    let rendered = report::render(&outcome, command.args().format)?;
    println!("{rendered}");

    info!(
        "Execution time: {:.1} minutes",
        started.elapsed().as_secs_f64() / 60.0
    );
    Ok(())
}

/// Wire up the client, store and governor, then run the selected stages
async fn run_application(
    config: &Config,
    command: &Command,
) -> Result<RunOutcome, FollowwatchError> {
    let args = command.args();

    let mut settings = PipelineSettings::from_config(config);
    if let Some(window_days) = args.window_days {
        if window_days == 0 {
            return Err(FollowwatchError::InvalidData(
                "--window-days must be at least 1".to_string(),
            ));
        }
        settings.window_days = window_days;
    }

    let date = resolve_date(
        args.date,
        Local::now().date_naive(),
        config.date_lag_days(),
    );
    info!("Run date: {}", date.format("%Y-%m-%d"));

    let client = TwitterClient::new(config.twitter.clone())?;
    debug!("API base URL: {}", client.base_url());
    let store = JsonFileStore::new(config.data_dir());

    let mut pipeline = Pipeline::new(&client, &store, RateGovernor::from_config(config), settings);
    pipeline.run(command.mode(), date).await
}

/// Resolves once SIGINT or SIGTERM arrives
async fn setup_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let handlers = (
            signal::unix::signal(signal::unix::SignalKind::terminate()),
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
        );
        match handlers {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to register signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
