use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use molt_core::{
    load_studio_config, ClipSelector, FsObjectStore, HttpGenerationGateway, HttpTransferClient,
    IntegrityAuditor, LoggingTreasury, PayoutConfig, PayoutEngine, ProductionScheduler,
    ProductionWorker, SchedulerConfig, StudioConfig, StudioStore, TransferClient,
    UnclaimedFundsSweeper, UnconfiguredTransferClient, VotingPeriodManager, WorkerConfig,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

mod commands;

pub use commands::{AuditReport, GatewayCheck, PayoutList, StatusReport, TickSummary, UnclaimedList};

use commands::DisplayFallback;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] molt_core::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] molt_core::StoreError),
    #[error(transparent)]
    Voting(#[from] molt_core::VotingError),
    #[error(transparent)]
    Production(#[from] molt_core::ProductionError),
    #[error(transparent)]
    Clip(#[from] molt_core::ClipError),
    #[error(transparent)]
    Payout(#[from] molt_core::PayoutError),
    #[error(transparent)]
    Sweep(#[from] molt_core::SweepError),
    #[error(transparent)]
    Audit(#[from] molt_core::AuditError),
    #[error(transparent)]
    Gateway(#[from] molt_core::GatewayError),
    #[error(transparent)]
    ObjectStore(#[from] molt_core::ObjectStoreError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0} integrity violation(s) found")]
    IntegrityViolations(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Molt Studios pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to molt.toml
    #[arg(long, default_value = "configs/molt.toml")]
    pub config: PathBuf,
    /// Overrides the studio database path
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Overrides the asset storage root
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pipeline counts by status
    Status(StatusArgs),
    /// Runs one pass of a background job
    Tick(TickArgs),
    /// Checks pipeline invariants; exits non-zero on violations
    Audit,
    /// Creates the missing series of a promoted submission
    RecoverOrphan(RecoverArgs),
    /// Manual episode controls
    #[command(subcommand)]
    Episode(EpisodeCommands),
    /// Series controls
    #[command(subcommand)]
    Series(SeriesCommands),
    /// Payout queries
    #[command(subcommand)]
    Payouts(PayoutCommands),
    /// Unclaimed fund queries
    #[command(subcommand)]
    Unclaimed(UnclaimedCommands),
    /// Payout wallet management
    #[command(subcommand)]
    Wallet(WalletCommands),
    /// Accounting exports
    #[command(subcommand)]
    Ledger(LedgerCommands),
}

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Also check the generation gateway
    #[arg(long, default_value_t = false)]
    pub gateway: bool,
}

#[derive(Args, Debug)]
pub struct TickArgs {
    #[arg(value_enum)]
    pub target: TickTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TickTarget {
    Voting,
    Production,
    Transfers,
    Sweep,
    All,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    pub submission_id: String,
}

#[derive(Subcommand, Debug)]
pub enum EpisodeCommands {
    /// Re-arms a failed episode
    Retry { episode_id: String },
    /// Marks an episode failed
    Abandon {
        episode_id: String,
        #[arg(long, default_value = "abandoned by operator")]
        reason: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SeriesCommands {
    /// Closes the clip vote of a series and picks its winning variant
    Finalize { series_id: String },
}

#[derive(Subcommand, Debug)]
pub enum PayoutCommands {
    List(PayoutListArgs),
}

#[derive(Args, Debug, Default)]
pub struct PayoutListArgs {
    /// pending, completed or failed
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub vote: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum UnclaimedCommands {
    List {
        /// Include claimed and swept rows
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum WalletCommands {
    Register {
        owner_id: String,
        wallet_address: String,
        #[arg(long, default_value_t = false)]
        verified: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    Export(LedgerExportArgs),
}

#[derive(Args, Debug)]
pub struct LedgerExportArgs {
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,
    /// First day excluded (YYYY-MM-DD)
    #[arg(long)]
    pub end: NaiveDate,
    #[arg(long, default_value = "ledger")]
    pub out: PathBuf,
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `--log-level`.
pub fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let now = Utc::now();

    match &cli.command {
        Commands::Status(args) => render(&context.status(args, now).await?, cli.format)?,
        Commands::Tick(args) => render(&context.tick(args.target, now).await?, cli.format)?,
        Commands::Audit => {
            let report = context.audit(now)?;
            render(&report, cli.format)?;
            let violations = report.violations();
            if violations > 0 {
                return Err(AppError::IntegrityViolations(violations));
            }
        }
        Commands::RecoverOrphan(args) => {
            let scheduled = context
                .scheduler
                .recover_orphan(&context.store, &args.submission_id, now)?;
            render(&scheduled, cli.format)?;
        }
        Commands::Episode(EpisodeCommands::Retry { episode_id }) => {
            render(&context.worker()?.retry_episode(episode_id, now)?, cli.format)?
        }
        Commands::Episode(EpisodeCommands::Abandon { episode_id, reason }) => render(
            &context.worker()?.abandon_episode(episode_id, reason, now)?,
            cli.format,
        )?,
        Commands::Series(SeriesCommands::Finalize { series_id }) => {
            render(&context.selector().finalize_series(series_id, now)?, cli.format)?
        }
        Commands::Payouts(PayoutCommands::List(args)) => {
            render(&context.payout_list(args)?, cli.format)?
        }
        Commands::Unclaimed(UnclaimedCommands::List { all }) => {
            render(&context.unclaimed_list(!*all)?, cli.format)?
        }
        Commands::Wallet(WalletCommands::Register {
            owner_id,
            wallet_address,
            verified,
        }) => render(
            &context
                .payouts
                .register_wallet(owner_id, wallet_address, *verified, now)?,
            cli.format,
        )?,
        Commands::Ledger(LedgerCommands::Export(args)) => {
            let (start, end) = day_range(args.start, args.end)?;
            let out = context.config.resolve_path(&args.out);
            render(&context.payouts.export_ledger(start, end, out, now)?, cli.format)?
        }
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: serde::Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

fn day_range(start: NaiveDate, end: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if end <= start {
        return Err(AppError::InvalidArgument(format!(
            "ledger end {end} must come after start {start}"
        )));
    }
    let midnight = |day: NaiveDate| day.and_hms_opt(0, 0, 0).map(|at| Utc.from_utc_datetime(&at));
    match (midnight(start), midnight(end)) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(AppError::InvalidArgument("unrepresentable ledger range".into())),
    }
}

struct AppContext {
    config: StudioConfig,
    store: StudioStore,
    storage_dir: PathBuf,
    scheduler: ProductionScheduler,
    payouts: PayoutEngine,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_studio_config(&cli.config)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        if let Some(parent) = database.parent() {
            std::fs::create_dir_all(parent).map_err(|source| molt_core::ConfigError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let store = StudioStore::new(&database)?;
        store.initialize()?;

        let storage_dir = cli
            .storage_dir
            .clone()
            .unwrap_or_else(|| config.resolve_path(&config.storage.root_dir));
        let scheduler = ProductionScheduler::new(SchedulerConfig::from(&config.production));
        let transfers: Arc<dyn TransferClient> = match &config.payouts.transfer_endpoint {
            Some(endpoint) => Arc::new(
                HttpTransferClient::new(endpoint, StdDuration::from_secs(30))
                    .map_err(|err| AppError::InvalidConfig(err.to_string()))?,
            ),
            None => Arc::new(UnconfiguredTransferClient),
        };
        let payout_config = PayoutConfig::from_section(&config.payouts)?;
        let payouts = PayoutEngine::new(store.clone(), payout_config, transfers);

        Ok(Self {
            config,
            store,
            storage_dir,
            scheduler,
            payouts,
        })
    }

    fn gateway(&self) -> Result<HttpGenerationGateway> {
        Ok(HttpGenerationGateway::new(
            &self.config.generation.endpoint,
            StdDuration::from_secs(self.config.generation.timeout_seconds),
        )?)
    }

    fn worker(&self) -> Result<ProductionWorker> {
        let objects = FsObjectStore::new(&self.storage_dir, &self.config.storage.public_base_url)?;
        Ok(ProductionWorker::new(
            self.store.clone(),
            Arc::new(self.gateway()?),
            Arc::new(objects),
            WorkerConfig::from_config(&self.config),
        ))
    }

    fn selector(&self) -> ClipSelector {
        ClipSelector::new(self.store.clone(), self.payouts.clone(), self.scheduler.clone())
    }

    fn voting(&self) -> VotingPeriodManager {
        VotingPeriodManager::new(
            self.store.clone(),
            self.scheduler.clone(),
            self.config.voting.batch_limit,
        )
    }

    fn sweeper(&self) -> UnclaimedFundsSweeper {
        UnclaimedFundsSweeper::new(
            self.store.clone(),
            Arc::new(LoggingTreasury),
            self.config.sweeper.batch_size,
        )
    }

    fn auditor(&self) -> IntegrityAuditor {
        IntegrityAuditor::new(
            self.store.clone(),
            Duration::minutes(self.config.production.stale_after_minutes),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let configs_dir = temp.path().join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        let template = fs::read_to_string("../configs/molt.toml").unwrap();
        let config = template
            .replace(
                "base_dir = \"/srv/molt\"",
                &format!("base_dir = {:?}", temp.path().display().to_string()),
            )
            .replace(
                "endpoint = \"https://molt-studios--molt-video-gen-v2-generate-video.modal.run\"",
                "endpoint = \"http://127.0.0.1:9\"",
            );
        fs::write(configs_dir.join("molt.toml"), config).unwrap();

        let cli = Cli {
            config: configs_dir.join("molt.toml"),
            database: None,
            storage_dir: None,
            log_level: None,
            format: OutputFormat::Json,
            command: Commands::Audit,
        };
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn context_initializes_database_under_base_dir() {
        let (temp, context) = prepare_test_context();
        assert!(context.store.path().starts_with(temp.path()));
        assert!(context.store.path().exists());
        assert!(context.storage_dir.ends_with("storage/assets"));
    }

    #[test]
    fn ledger_range_must_be_forward() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let (from, to) = day_range(start, end).unwrap();
        assert_eq!(to - from, Duration::days(31));
        assert!(matches!(
            day_range(end, start),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "moltctl",
            "--format",
            "json",
            "episode",
            "abandon",
            "ep-1",
            "--reason",
            "bad prompt",
        ])
        .unwrap();
        match cli.command {
            Commands::Episode(EpisodeCommands::Abandon { episode_id, reason }) => {
                assert_eq!(episode_id, "ep-1");
                assert_eq!(reason, "bad prompt");
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["moltctl", "tick", "all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tick(TickArgs {
                target: TickTarget::All
            })
        ));
    }
}
