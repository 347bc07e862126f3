//! Upgrade Sentinel daemon
//!
//! Runs the risk aggregation engine with:
//! - CLI arguments and TOML config file support
//! - Structured logging with tracing
//! - Simulated signal sources (until real feeds are wired in)
//! - Optional webhook alert delivery

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use upgrade_sentinel::engine::sim::{
    SimGovernanceSource, SimSentimentSource, SimTechnicalSource, SimVolatilitySource,
};
use upgrade_sentinel::engine::{
    AlertDispatcher, EngineConfig, LogDispatcher, MemoryStore, SignalSource, WebhookDispatcher,
};
use upgrade_sentinel::{EventId, RiskEngine, UpgradeEvent};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(version, about = "Protocol upgrade risk sentinel", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sentinel.toml")]
    config: String,

    /// Override network label for simulated events
    #[arg(long)]
    network: Option<String>,

    /// Override number of simulated upgrade events
    #[arg(long)]
    events: Option<u32>,

    /// Override source poll interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Run for this many seconds, then shut down (0: until interrupted)
    #[arg(long)]
    duration: Option<u64>,

    /// Webhook URL for alert delivery (overrides config)
    #[arg(long, env = "SENTINEL_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Log file path (logs to both file and stdout)
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "sentinel.toml")]
        output: String,
    },
    /// Validate config without running
    ValidateConfig,
    /// Run the sentinel (default)
    Run,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Network label attached to simulated events
    #[serde(default = "default_network")]
    pub network: String,
    /// Number of simulated upgrade events to track
    #[serde(default = "default_events")]
    pub events: u32,
    /// Source poll interval, seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Run duration in seconds; 0 runs until interrupted
    #[serde(default)]
    pub duration_secs: u64,
    /// Webhook URL for alert delivery (unset: log-only dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_events() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            events: default_events(),
            poll_interval_secs: default_poll_interval_secs(),
            duration_secs: 0,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: pretty, json, compact
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file path (logs to both file and stdout)
    #[serde(default)]
    pub log_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateConfig { output }) => {
            generate_sample_config(output)?;
            return Ok(());
        }
        Some(Commands::ValidateConfig) => {
            let config = load_config(&cli)?;
            config.engine.validate()?;
            println!("Configuration is valid:\n{:#?}", config);
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = load_config(&cli)?;
    setup_logging(&config, &cli)?;

    let network = cli.network.clone().unwrap_or(config.run.network.clone());
    let events = cli.events.unwrap_or(config.run.events).max(1);
    let poll_interval = Duration::from_secs(
        cli.poll_interval
            .unwrap_or(config.run.poll_interval_secs)
            .max(1),
    );
    let webhook_url = cli.webhook_url.clone().or(config.run.webhook_url.clone());

    let dispatcher: Arc<dyn AlertDispatcher> = match &webhook_url {
        Some(url) => {
            info!(url = %url, "alerts will be delivered via webhook");
            Arc::new(WebhookDispatcher::new(url.clone()))
        }
        None => Arc::new(LogDispatcher),
    };

    let store = Arc::new(MemoryStore::new());
    let engine = RiskEngine::new(config.engine.clone(), store.clone(), dispatcher)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %network,
        events,
        poll_interval_secs = poll_interval.as_secs(),
        "sentinel starting"
    );

    let mut event_ids = Vec::new();
    for n in 1..=events {
        let event_id = EventId::new(format!("sim-upgrade-{n}"));
        engine.register_event(
            UpgradeEvent::new(event_id.clone(), network.clone())
                .with_proposal_ref(format!("proposal/{n}")),
        )?;

        let sources: Vec<Arc<dyn SignalSource>> = vec![
            Arc::new(SimVolatilitySource::new(1.0)),
            Arc::new(SimSentimentSource::new(0.15)),
            Arc::new(SimGovernanceSource::new(20)),
            Arc::new(SimTechnicalSource::new(0.4)),
        ];
        for source in sources {
            engine.attach_source(source, event_id.clone(), poll_interval)?;
        }
        event_ids.push(event_id);
    }

    let duration = cli.duration.unwrap_or(config.run.duration_secs);
    if duration > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {
                info!(duration_secs = duration, "run duration elapsed");
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("interrupt received");
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("interrupt received");
    }
    engine.shutdown();

    // Give workers a moment to drain pending writes and notices.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for event_id in &event_ids {
        let snapshots = store.snapshots_for(event_id);
        let alerts = store.alerts_for(event_id);
        if let Some(latest) = snapshots.last() {
            info!(
                event_id = %event_id,
                cycles = snapshots.len(),
                score = latest.composite_score,
                category = latest.category.as_str(),
                alerts = alerts.len(),
                "final state"
            );
        }
    }

    Ok(())
}

// ============================================================================
// Config & logging helpers
// ============================================================================

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if !Path::new(&cli.config).exists() {
        // No file: built-in defaults, still overridable from the CLI.
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(&cli.config)?;
    Ok(toml::from_str(&content)?)
}

fn setup_logging(config: &AppConfig, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str());

    // RUST_LOG wins outright; otherwise use the configured level and quiet
    // the HTTP client internals down to warn.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(level)
            .add_directive("hyper::=warn".parse().expect("static directive"))
            .add_directive("reqwest=warn".parse().expect("static directive"))
    });

    if let Some(log_path) = cli.log_file.as_ref().or(config.logging.log_file.as_ref()) {
        // A file sink forces JSON on both outputs so the lines stay
        // machine-readable wherever they land.
        let file = Mutex::new(std::fs::File::create(log_path)?);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .json(),
            )
            .init();
        eprintln!("Writing JSON logs to {} and stdout", log_path);
        return Ok(());
    }

    let format = cli
        .log_format
        .as_deref()
        .unwrap_or(match config.logging.format {
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
        });
    match format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }

    Ok(())
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = AppConfig::default();
    let content = toml::to_string_pretty(&sample)?;

    let with_comments = format!(
        r#"# Upgrade Sentinel Configuration
# See: cargo run --bin sentinel -- --help

{}

# Set a webhook for alert delivery via SENTINEL_WEBHOOK_URL
# or under [run]:
# webhook_url = "https://hooks.example.com/services/..."
"#,
        content
    );

    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {}", path);
    Ok(())
}
