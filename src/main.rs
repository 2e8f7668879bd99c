use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gridwarden::config::GridConfig;
use gridwarden::detect::engine::AnomalyEngine;
use gridwarden::detect::Severity;
use gridwarden::patch::{PatchManager, PatchRequest};
use gridwarden::storage::{SqliteStore, Store};
use gridwarden::{ingest, storage};

#[derive(Parser)]
#[command(
    name = "gridwarden",
    about = "Telemetry anomaly detection and firmware patch rollout for grid-edge fleets",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler-driven telemetry ingestion)
    Serve,

    /// Run immediate ingestion cycles and print surviving alerts
    Ingest {
        /// Number of cycles to run
        #[arg(long, default_value = "1")]
        cycles: u32,
    },

    /// List recorded security events
    Alerts {
        /// Filter by severity (info, low, medium, high, critical)
        #[arg(long)]
        severity: Option<String>,

        /// Filter by category (e.g. ids_alert, attack_simulation)
        #[arg(long)]
        category: Option<String>,

        /// Maximum events to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show recent telemetry records
    Telemetry {
        /// Maximum records to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List known components and their latest patch
    Components,

    /// Schedule and apply a firmware patch
    Patch {
        /// Target component name
        #[arg(long)]
        component: String,

        /// Firmware version to roll out
        #[arg(long)]
        version: String,

        /// Payload file; a random payload is generated when omitted
        #[arg(long)]
        payload_file: Option<PathBuf>,

        /// Requester recorded on the patch status
        #[arg(long, default_value = "operator")]
        requested_by: String,
    },

    /// Record a simulated attack alert
    SimulateAttack {
        /// Attack type: dos, spoof, malware, or anything else for generic
        #[arg(long, default_value = "generic")]
        attack_type: String,

        /// Target component; defaults to the core controller
        #[arg(long)]
        component: Option<String>,
    },
}

fn open_store(config: &GridConfig) -> Result<Arc<dyn Store>> {
    let pool = storage::open_pool(&config.db_path)?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn load_fleet(config: &GridConfig) -> Result<Vec<ingest::FleetNode>> {
    match &config.fleet_path {
        Some(path) => ingest::load_fleet(path),
        None => Ok(ingest::default_fleet()),
    }
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
    let config = match &cli.config {
        Some(path) => GridConfig::load(path)?,
        None => GridConfig::load_or_default(),
    };

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting gridwarden daemon");
            gridwarden::serve(config).await?;
        }
        Commands::Ingest { cycles } => {
            let store = open_store(&config)?;
            let engine = Mutex::new(AnomalyEngine::new(config.detect.clone(), store));
            let fleet = load_fleet(&config)?;
            let mut rng = StdRng::from_entropy();

            for cycle in 1..=cycles {
                let alerts = ingest::run_cycle(&engine, &fleet, &mut rng);
                println!("cycle {}: {} alert(s)", cycle, alerts.len());
                for alert in alerts {
                    println!(
                        "  [{}] {} on {} ({}={})",
                        alert.severity, alert.reason, alert.component, alert.metric, alert.value
                    );
                }
            }
        }
        Commands::Alerts {
            severity,
            category,
            limit,
        } => {
            let severity = severity
                .map(|s| s.parse::<Severity>())
                .transpose()
                .context("invalid --severity")?;
            let store = open_store(&config)?;
            let events = store.list_events(severity, category.as_deref(), limit)?;

            if events.is_empty() {
                println!("No security events recorded.");
            } else {
                println!("{:<10} | {:<18} | {:<20} | Details", "Severity", "Category", "Created");
                println!("{:-<10}-|-{:-<18}-|-{:-<20}-|-{:-<40}", "", "", "", "");
                for event in events {
                    println!(
                        "{:<10} | {:<18} | {:<20} | {}",
                        event.severity.as_str(),
                        event.category,
                        event.created_at.format("%Y-%m-%d %H:%M:%S"),
                        event.details
                    );
                }
            }
        }
        Commands::Telemetry { limit } => {
            let store = open_store(&config)?;
            let records = store.recent_telemetry(limit)?;
            if records.is_empty() {
                println!("No telemetry recorded.");
            } else {
                for record in records {
                    println!(
                        "{} {} {}",
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.component,
                        record.payload
                    );
                }
            }
        }
        Commands::Components => {
            let store = open_store(&config)?;
            let summaries = store.list_components()?;
            if summaries.is_empty() {
                println!("No components registered.");
            } else {
                println!(
                    "{:<20} | {:<10} | {:<10} | {:<12} | Patch",
                    "Name", "Type", "Firmware", "Criticality"
                );
                println!("{:-<20}-|-{:-<10}-|-{:-<10}-|-{:-<12}-|-{:-<20}", "", "", "", "", "");
                for summary in summaries {
                    let patch = match (&summary.latest_patch_version, summary.latest_patch_state) {
                        (Some(version), Some(state)) => format!("{version} ({state})"),
                        _ => "-".to_string(),
                    };
                    let c = &summary.component;
                    println!(
                        "{:<20} | {:<10} | {:<10} | {:<12} | {}",
                        c.name, c.component_type, c.firmware_version, c.criticality, patch
                    );
                }
            }
        }
        Commands::Patch {
            component,
            version,
            payload_file,
            requested_by,
        } => {
            let payload = match payload_file {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("failed to read payload file: {}", path.display()))?,
                None => rand::thread_rng().gen::<[u8; 32]>().to_vec(),
            };
            let request = PatchRequest {
                component_name: component.clone(),
                version: version.clone(),
                payload,
                requested_by,
            };

            let store = open_store(&config)?;
            let mut manager = PatchManager::new(config.patch.clone(), store);
            let ticket = manager.schedule_patch(&request)?;
            println!(
                "patch {} scheduled: {} v{} ({})",
                ticket.id, component, version, ticket.state
            );

            let mut tickets = [ticket];
            manager.apply_patches(&mut tickets).await?;
            let ticket = &tickets[0];
            println!("patch {} finished: {}", ticket.id, ticket.state);
            println!("  notes: {}", ticket.notes);
        }
        Commands::SimulateAttack {
            attack_type,
            component,
        } => {
            let store = open_store(&config)?;
            let engine = AnomalyEngine::new(config.detect.clone(), store);
            let alert = engine.simulate_attack(&attack_type, component.as_deref());
            println!("[{}] {} on {}", alert.severity, alert.reason, alert.component);
            if let Some(description) = &alert.description {
                println!("  detected:   {description}");
            }
            if let Some(mitigation) = &alert.mitigation {
                println!("  mitigation: {mitigation}");
            }
        }
    }

    Ok(())
}
