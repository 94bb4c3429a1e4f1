use anyhow::Context;
use clap::{Parser, ValueEnum};
use dataprov::{
    parse_engine_version, plan, provision, DuckdbVersion, ExecutionStage, FixedVersion,
    ManifestTemplate, ProvisionConfig, RetryPolicy, RowStoreConfig, VersionProvider,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Stage {
    /// Fetch, load and validate
    All,
    /// Only fetch artifacts into the cache
    FetchOnly,
    /// Load and validate from the cache without downloading artifacts
    LoadOnly,
}

impl From<Stage> for ExecutionStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::All => ExecutionStage::All,
            Stage::FetchOnly => ExecutionStage::FetchOnly,
            Stage::LoadOnly => ExecutionStage::LoadOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dataprov")]
#[command(about = "Download tutorial datasets and load them into PostgreSQL", long_about = None)]
#[command(version)]
struct Args {
    /// Stage to execute
    #[arg(long, value_enum, default_value = "all")]
    stage: Stage,

    /// Directory for cached artifacts
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON manifest replacing the built-in dataset list
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Override the manifest base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Pin the analytic engine release tag (e.g. "0.10") instead of reading it from DuckDB
    #[arg(long)]
    engine_tag: Option<String>,

    /// Maximum number of concurrent downloads
    #[arg(short, long, default_value_t = 4)]
    jobs: usize,

    /// Retries for transient network failures
    #[arg(long, default_value_t = 4)]
    retries: usize,

    /// Delay before the first retry in milliseconds; doubles on each retry
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,

    /// Per-request download timeout in seconds
    #[arg(long, default_value_t = 1800)]
    timeout_secs: u64,

    /// Never use the network; artifacts must already be cached
    #[arg(long)]
    offline: bool,

    /// Print the resolved manifest as JSON and exit
    #[arg(long)]
    plan: bool,

    /// Row store host
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    pg_host: String,

    /// Row store port
    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    pg_port: u16,

    /// Row store user
    #[arg(long, env = "PGUSER", default_value = "postgres")]
    pg_user: String,

    /// Row store password
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pg_password: Option<String>,

    /// Row store database
    #[arg(long, env = "PGDATABASE", default_value = "postgres")]
    pg_database: String,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dataprov={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut template = match &args.manifest {
        Some(path) => ManifestTemplate::from_file(path)
            .with_context(|| format!("loading manifest {}", path.display()))?,
        None => ManifestTemplate::builtin(),
    };
    if let Some(base_url) = &args.base_url {
        template.base_url = base_url.clone();
    }

    let versions: Box<dyn VersionProvider + Send> = match &args.engine_tag {
        Some(tag) => Box::new(FixedVersion(
            parse_engine_version(tag).context("invalid --engine-tag")?,
        )),
        None => Box::new(DuckdbVersion),
    };

    if args.plan {
        let manifest = plan(&template, versions)?;
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    let config = ProvisionConfig {
        data_dir: args.data_dir,
        max_concurrent_downloads: args.jobs,
        retry: RetryPolicy {
            max_retries: args.retries,
            base_delay: Duration::from_millis(args.retry_delay_ms),
            ..RetryPolicy::default()
        },
        request_timeout: Duration::from_secs(args.timeout_secs),
        offline: args.offline,
        show_progress: !args.no_progress,
        row_store: RowStoreConfig {
            host: args.pg_host,
            port: args.pg_port,
            user: args.pg_user,
            password: args.pg_password,
            dbname: args.pg_database,
        },
    };

    info!("🚀 dataprov - tutorial data provisioning");
    info!("Data directory: {:?}", config.data_dir);
    info!("Stage: {:?}", args.stage);

    match provision(&config, &template, versions, args.stage.into()).await {
        Ok(report) => {
            info!(
                "✅ Done: {} artifact(s) available, {} table(s) validated",
                report.fetch.results.iter().filter(|r| r.is_available()).count(),
                report.validation.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    }
}
