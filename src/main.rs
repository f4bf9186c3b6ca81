use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rusty_archive_keeper::archiver::RegistryClient;
use rusty_archive_keeper::ca::{CaConfig, CaNetwork};
use rusty_archive_keeper::changes::{CachedCopyDetector, ChangeDetector, MtimeDetector};
use rusty_archive_keeper::config::{ConfigError, KeeperConfig};
use rusty_archive_keeper::constants::DEFAULT_FILE_PATTERN;
use rusty_archive_keeper::driver::{BatchDriver, FlowSummary};
use rusty_archive_keeper::error::AppError;
use rusty_archive_keeper::probe::{parse_timeout, Prober};
use rusty_archive_keeper::types::SamplingMethod;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "archive-keeper",
    about = "Keeps an EPICS Archiver Appliance in step with the PVs that are actually live",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Turn on verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Number of PVs probed per batch
    #[arg(short, long, global = true)]
    batch_size: Option<usize>,
    /// Seconds to wait for the PVs of a batch to connect
    #[arg(short, long, global = true)]
    timeout: Option<String>,
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check which PVs in a file (one per line, `-` for stdin) connect
    Check {
        /// Print only the connected PVs
        #[arg(short, long, conflicts_with = "unconnected_only")]
        connected_only: bool,
        /// Print only the PVs that did not connect
        #[arg(short, long)]
        unconnected_only: bool,
        #[arg(default_value = "-")]
        filename: String,
    },
    /// Pause PVs that have been disconnected for a while and still do not connect
    PauseDisconnected {
        /// URL of the mgmt bpl, for example http://arch.slac.stanford.edu/mgmt/bpl
        url: String,
        /// Pause PVs that have not connected for this many minutes
        minutes: u64,
    },
    /// Resume paused PVs that connect again
    ResumePaused {
        /// URL of the mgmt bpl
        url: String,
    },
    /// Submit live PVs from changed archive request files
    ProcessArchiveFiles {
        /// Sampling period used when a request line has none
        #[arg(short = 'p', long)]
        default_sampling_period: Option<f64>,
        /// Sampling method used when a request line has none
        #[arg(short = 'm', long, value_parser = parse_method)]
        default_sampling_method: Option<SamplingMethod>,
        /// Ignore request files last modified more than this many days ago
        #[arg(short, long)]
        ignore_older: Option<u64>,
        /// Detect changes against cached copies kept in this directory
        /// instead of by modification time
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// URL of the mgmt bpl
        url: String,
        /// Root folder of the IOC archive request files
        root_folder: PathBuf,
        /// Extended glob selecting the request files under the root folder
        #[arg(default_value = DEFAULT_FILE_PATTERN)]
        pattern: String,
    },
}

fn parse_method(value: &str) -> Result<SamplingMethod, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.common.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(common: &CommonArgs) -> Result<KeeperConfig, ConfigError> {
    let mut config = match &common.config {
        Some(path) => KeeperConfig::load(path)?,
        None => KeeperConfig::default(),
    };
    if let Some(batch_size) = common.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(timeout) = &common.timeout {
        config.probe_timeout =
            parse_timeout(timeout).map_err(|e| ConfigError::invalid("timeout", e.to_string()))?;
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(&cli.common)?;
    let prober = Prober::new(CaNetwork::new(CaConfig::from_env()?));

    match cli.command {
        Commands::Check {
            connected_only,
            unconnected_only,
            filename,
        } => {
            config.validate()?;
            let names = read_names(&filename)?;
            let driver = BatchDriver::probe_only(prober, config);
            for (name, live) in driver.check(&names).await? {
                match (connected_only, unconnected_only, live) {
                    (true, _, true) | (_, true, false) => println!("{}", name),
                    (false, false, true) => println!("Connected {}", name),
                    (false, false, false) => println!("Not connected {}", name),
                    _ => {}
                }
            }
            Ok(())
        }
        Commands::PauseDisconnected { url, minutes } => {
            config.validate()?;
            let driver = BatchDriver::new(prober, registry(&url, &config)?, config);
            let threshold = minutes_to_duration(minutes);
            report("pause-disconnected", driver.pause_disconnected(threshold).await)
        }
        Commands::ResumePaused { url } => {
            config.validate()?;
            let driver = BatchDriver::new(prober, registry(&url, &config)?, config);
            report("resume-paused", driver.resume_paused().await)
        }
        Commands::ProcessArchiveFiles {
            default_sampling_period,
            default_sampling_method,
            ignore_older,
            cache_dir,
            url,
            root_folder,
            pattern,
        } => {
            if let Some(period) = default_sampling_period {
                config.default_sampling_period = period;
            }
            if let Some(method) = default_sampling_method {
                config.default_sampling_method = method;
            }
            if let Some(days) = ignore_older {
                config.ignore_older_days = days;
            }
            config.validate()?;

            let detector: Box<dyn ChangeDetector> = match cache_dir {
                Some(cache_dir) => Box::new(CachedCopyDetector::new(root_folder, pattern, cache_dir)),
                None => Box::new(MtimeDetector::new(root_folder, pattern, config.ignore_older())),
            };
            let driver = BatchDriver::new(prober, registry(&url, &config)?, config);
            report(
                "process-archive-files",
                driver.process_archive_files(detector.as_ref()).await,
            )
        }
    }
}

fn registry(url: &str, config: &KeeperConfig) -> Result<RegistryClient, AppError> {
    Ok(RegistryClient::with_settings(
        url,
        config.http_timeout,
        config.http_retries,
    )?)
}

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Remote failures end the flow but not with a failing exit status.
fn report(flow: &str, result: Result<FlowSummary, AppError>) -> anyhow::Result<()> {
    match result {
        Ok(summary) => {
            info!(
                "{} finished: {} PVs acted on in {} batches ({} failed)",
                flow, summary.affected, summary.batches, summary.failed_batches
            );
            Ok(())
        }
        Err(e) if e.is_config() => Err(e.into()),
        Err(e) => {
            error!("{} stopped: {}", flow, e);
            Ok(())
        }
    }
}

fn read_names(filename: &str) -> anyhow::Result<Vec<String>> {
    let mut text = String::new();
    if filename == "-" {
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read PV names from stdin")?;
    } else {
        text = std::fs::read_to_string(filename)
            .with_context(|| format!("Failed to read PV names from {}", filename))?;
    }
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
