//! crmsync CLI - Command line interface for record sync runs.
//!
//! This tool loads a sync configuration, wires the Shopify source and the
//! HubSpot destination from environment credentials, and runs the sync
//! pipeline or one of its diagnostic commands.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crmsync_connector::{
    DestinationProvider, HubSpotConfig, HubSpotDestination, MemoryDestination, ShopifyConfig,
    ShopifySource,
};
use crmsync_sync::{SyncConfig, SyncEngine, SyncReport};

#[derive(Parser)]
#[command(name = "crmsync")]
#[command(about = "crmsync - Sync commerce records into a CRM")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load environment variables from this file instead of `.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync.
    Sync {
        /// Path to the sync configuration.
        #[arg(short, long)]
        config: PathBuf,

        /// Only sync these object types (repeatable).
        #[arg(short, long = "object")]
        objects: Vec<String>,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,

        /// Read from the source but write to an in-memory destination.
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a sync configuration.
    Validate {
        /// Path to the sync configuration.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Check the destination credentials.
    CheckAccess,

    /// List the properties of a destination object.
    Properties {
        /// Destination object (e.g. `contacts`).
        #[arg(short, long)]
        object: String,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level.as_str())
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    load_env(cli.env_file.as_deref())?;

    match cli.command {
        Commands::Sync {
            config,
            objects,
            json,
            dry_run,
        } => cmd_sync(&config, &objects, json, dry_run).await,

        Commands::Validate { config } => cmd_validate(&config),

        Commands::CheckAccess => cmd_check_access().await,

        Commands::Properties { object } => cmd_properties(&object).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "crmsync", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Load credentials from an env file. A missing default `.env` is fine.
fn load_env(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// Read a required environment variable.
fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} is not set", name))
}

/// Shopify settings from the environment. Every page request is bounded by
/// `call_timeout`.
fn shopify_config(call_timeout: Duration) -> Result<ShopifyConfig> {
    let mut config = ShopifyConfig::new(
        required_env("SHOPIFY_STORE_URL")?,
        required_env("SHOPIFY_ACCESS_TOKEN")?,
    );
    if let Ok(version) = std::env::var("SHOPIFY_API_VERSION") {
        config.api_version = version;
    }
    config.http.request_timeout = call_timeout;
    Ok(config)
}

fn hubspot_destination() -> Result<HubSpotDestination> {
    let mut config = HubSpotConfig::new(required_env("HUBSPOT_ACCESS_TOKEN")?);
    if let Ok(base_url) = std::env::var("HUBSPOT_API_BASE") {
        config = config.with_base_url(base_url);
    }
    HubSpotDestination::new(config).context("Failed to create HubSpot client")
}

/// Load a configuration file.
fn load_config(path: &Path) -> Result<SyncConfig> {
    SyncConfig::load(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}

/// Run a sync.
async fn cmd_sync(config_path: &Path, objects: &[String], json: bool, dry_run: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    config
        .retain_objects(objects)
        .context("Invalid --object selection")?;

    let mut source = ShopifySource::new(shopify_config(config.call_timeout())?)
        .context("Failed to create Shopify client")?;
    for object in &config.objects {
        if let Some(spec) = &object.source {
            source = source.with_resource(object.name.clone(), spec.clone());
        }
    }
    let source = Arc::new(source);

    let report = if dry_run {
        info!("Dry run: writes go to an in-memory destination");
        let destination = Arc::new(MemoryDestination::new().lenient_schema());
        let report = run_sync(source, destination.clone(), config.clone()).await?;

        if !json {
            for object in destination_objects(&config) {
                for record in destination.records(object) {
                    println!("{} {}", object, serde_json::Value::Object(record.properties));
                }
            }
        }
        report
    } else {
        let destination = Arc::new(hubspot_destination()?);
        run_sync(source, destination, config).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Distinct destination objects, in configuration order.
fn destination_objects(config: &SyncConfig) -> Vec<&str> {
    let mut objects: Vec<&str> = Vec::new();
    for object in &config.objects {
        if !objects.contains(&object.destination_object.as_str()) {
            objects.push(&object.destination_object);
        }
    }
    objects
}

async fn run_sync<D>(
    source: Arc<ShopifySource>,
    destination: Arc<D>,
    config: SyncConfig,
) -> Result<SyncReport>
where
    D: DestinationProvider + ?Sized,
{
    let engine = SyncEngine::new(source, destination, config).context("Invalid configuration")?;
    engine.sync_all().await.context("Sync aborted")
}

fn print_report(report: &SyncReport) {
    println!("Sync finished in {:.1}s", report.duration.as_secs_f64());
    for object in &report.objects {
        println!(
            "  {} -> {}: {}",
            object.object_type,
            object.destination_object,
            object.counts()
        );
    }

    let failures: Vec<_> = report
        .outcomes()
        .filter(|(_, record)| record.outcome.is_failure())
        .collect();
    if !failures.is_empty() {
        println!("\nFailures:");
        for (object_type, record) in failures {
            let id = record
                .record_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} [{}]: {:?}",
                object_type,
                id,
                record.unique_value.as_deref().unwrap_or("-"),
                record.outcome
            );
        }
    }
}

/// Validate a configuration file.
fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration is valid.");
    println!("  Call timeout: {}s", config.call_timeout_secs);
    println!("  Creation pause: {}ms", config.creation_pause_ms);
    for object in &config.objects {
        println!(
            "  {} -> {} (unique: {}, group: {}, {} mapped fields, attributes: {})",
            object.name,
            object.destination_object,
            object.unique_field,
            object.property_group,
            object.field_mapping.len(),
            if object.include_attributes { "yes" } else { "no" }
        );
    }

    Ok(())
}

/// Check destination credentials.
async fn cmd_check_access() -> Result<()> {
    let destination = hubspot_destination()?;
    destination
        .verify_access()
        .await
        .context("Access check failed")?;

    println!("Access OK ({})", destination.name());
    Ok(())
}

/// List destination properties.
async fn cmd_properties(object: &str) -> Result<()> {
    let destination = hubspot_destination()?;
    let properties = destination
        .list_properties(object)
        .await
        .with_context(|| format!("Failed to list properties of {}", object))?;

    if properties.is_empty() {
        println!("No properties on {}.", object);
    } else {
        println!("Properties of {} ({}):", object, properties.len());
        for name in properties {
            println!("  {}", name);
        }
    }

    Ok(())
}
