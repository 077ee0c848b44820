use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use netpulse::broadcast::NullBroadcaster;
use netpulse::config::NetPulseConfig;
use netpulse::engine::Engine;
use netpulse::probes::{ProbeSet, TestConfig, TestKind, TestParams};
use netpulse::scheduler::Scheduler;
use netpulse::storage::{ResultStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "netpulse",
    about = "Self-hosted mobile-network diagnostics and probe scheduling",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + lifecycle engine + scheduler)
    Serve {
        /// Bind address (overrides config file)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path (overrides config file)
        #[arg(long)]
        db: Option<String>,
    },

    /// Run a single diagnostic test and print its samples
    Test {
        /// Test kind: speed, signal, coverage, roaming, api_health, api_load
        #[arg(long)]
        kind: String,

        /// Probe endpoint (URL or host), where the kind needs one
        #[arg(long)]
        target: Option<String>,

        /// Test duration in seconds
        #[arg(long, default_value = "10")]
        duration: f64,

        /// Samples per second
        #[arg(long, default_value = "1")]
        frequency: f64,

        /// SQLite database path
        #[arg(long, default_value = "data/netpulse.db")]
        db: String,
    },

    /// Manage recurring test schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show engine statistics from a running server
    Stats {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List,

    /// Add a new schedule
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,

        /// Cron expression (6-field, with seconds)
        #[arg(long)]
        cron: String,

        /// Test kind to run
        #[arg(long)]
        test: String,

        /// Probe endpoint, where the kind needs one
        #[arg(long)]
        target: Option<String>,
    },

    /// Remove a schedule
    Remove {
        /// Schedule name
        #[arg(long)]
        name: String,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, db } => {
            let mut config = NetPulseConfig::load_or_default();
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(db) = db {
                config.database.path = db;
            }
            tracing::info!(bind = %config.server.bind, "starting netpulse daemon");
            netpulse::serve(config).await?;
        }
        Commands::Test {
            kind,
            target,
            duration,
            frequency,
            db,
        } => {
            let kind: TestKind = kind.parse()?;
            run_one_off(kind, target, duration, frequency, &db).await?;
        }
        Commands::Schedule { action } => {
            let config = NetPulseConfig::load_or_default();
            let pool = netpulse::storage::open_pool(&config.database.path)?;
            let scheduler = Scheduler::new(pool);

            match action {
                ScheduleAction::List => {
                    let list = scheduler.list().await?;
                    if list.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!("{:<20} | {:<18} | {:<10} | Enabled", "Name", "Cron", "Kind");
                        println!("{:-<20}-|-{:-<18}-|-{:-<10}-|-{:-<7}", "", "", "", "");
                        for entry in list {
                            println!(
                                "{:<20} | {:<18} | {:<10} | {}",
                                entry.name, entry.cron_expr, entry.kind, entry.enabled
                            );
                        }
                    }
                }
                ScheduleAction::Add {
                    name,
                    cron,
                    test,
                    target,
                } => {
                    let kind: TestKind = test.parse()?;
                    let params = TestParams {
                        target,
                        ..TestParams::default()
                    };
                    scheduler.add(&name, &cron, kind, &params).await?;
                    println!("Schedule '{}' added.", name);
                }
                ScheduleAction::Remove { name } => {
                    scheduler.remove(&name).await?;
                    println!("Schedule '{}' removed.", name);
                }
                ScheduleAction::DryRun { hours } => {
                    let preview = scheduler.preview_next_runs(hours).await?;
                    if preview.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for (time, name, kind) in preview {
                            println!("{} : {} ({})", time, name, kind);
                        }
                    }
                }
            }
        }
        Commands::Stats { server } => {
            let url = format!("{}/api/stats", server.trim_end_matches('/'));
            let response = reqwest::get(&url).await?;
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

/// Run one test to completion on a local engine and print its samples.
async fn run_one_off(
    kind: TestKind,
    target: Option<String>,
    duration: f64,
    frequency: f64,
    db: &str,
) -> Result<()> {
    let pool = netpulse::storage::open_pool(db)?;
    let store: Arc<dyn ResultStore> = Arc::new(SqliteStore::new(pool));
    let source = Arc::new(ProbeSet::new()?);

    let engine_config = netpulse::config::EngineConfig {
        monitor_interval_sec: 0,
        ..netpulse::config::EngineConfig::default()
    };
    let engine = Engine::new(
        engine_config,
        store.clone(),
        source,
        Arc::new(NullBroadcaster),
    );

    let params = TestParams {
        duration_sec: duration,
        frequency_hz: frequency,
        target,
        ..TestParams::default()
    };
    let config = TestConfig::new(kind, params);
    let test_id = config.test_id.clone();

    store.save_config(&config).await?;
    engine.start(config).await?;

    println!("Running {} test {} for {}s...", kind, test_id, duration);
    while engine.is_running(&test_id).await {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    let samples = store.get_results(&test_id).await?;
    println!("\n{} samples recorded:", samples.len());
    println!("{:>4} | {:<4} | {:<25} | Data", "Seq", "Ok", "Recorded at");
    println!("{:-<4}-|-{:-<4}-|-{:-<25}-|-{:-<40}", "", "", "", "");
    for sample in &samples {
        let status = if sample.success { "yes" } else { "no" };
        let detail = match &sample.error {
            Some(error) => error.clone(),
            None => sample.data.to_string(),
        };
        println!(
            "{:>4} | {:<4} | {:<25} | {}",
            sample.seq,
            status,
            sample.recorded_at.to_rfc3339(),
            detail
        );
    }

    Ok(())
}
