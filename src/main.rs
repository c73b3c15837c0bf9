//! WolfTopo - Topology Manager for Sharded Storage Clusters
//!
//! Serves the topology admin API and inspects topology documents from the
//! command line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolftopo::api::HttpServer;
use wolftopo::config::WolfTopoConfig;
use wolftopo::kv;
use wolftopo::store::TopologyStore;

/// WolfTopo - Topology Manager for Sharded Storage Clusters
#[derive(Parser)]
#[command(name = "wolftopo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolftopo.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP admin API
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolftopo.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,

    /// Print the topology or a projection of it
    Show {
        #[arg(value_enum, default_value = "topology")]
        what: ShowTarget,

        /// Instance name, required for `instance`
        #[arg(short, long)]
        instance: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ShowTarget {
    Topology,
    Sharding,
    Routers,
    Storages,
    Masters,
    Instance,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, force } => run_init(output, force),
        Commands::Validate => run_validate(cli.config),
        Commands::Serve { bind } => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            run_serve(config, bind).await
        }
        Commands::Show { what, instance } => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            run_show(config, what, instance).await
        }
    }
}

fn load_config(path: &Path, log_level: Option<&str>) -> anyhow::Result<WolfTopoConfig> {
    let config = WolfTopoConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {:?}", path))?;
    init_logging(
        log_level.unwrap_or(&config.logging.level),
        &config.logging.format,
    );
    Ok(config)
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &WolfTopoConfig) -> anyhow::Result<TopologyStore> {
    let backend = kv::open_backend(&config.store)?;
    let store = TopologyStore::open(
        backend,
        &config.topology.name,
        config.store_options(),
        config.bootstrap.clone(),
    )
    .await
    .with_context(|| format!("failed to open topology '{}'", config.topology.name))?;
    Ok(store)
}

/// Serve the HTTP admin API until interrupted
async fn run_serve(mut config: WolfTopoConfig, bind: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.api.bind_address = bind;
    }
    if !config.api.enabled {
        anyhow::bail!("api.enabled is false, nothing to serve");
    }

    let store = open_store(&config).await?;
    let doc = store.get_topology().await?;
    tracing::info!(
        topology = %store.name(),
        revision = doc.revision,
        replicasets = doc.replicasets.len(),
        "Topology loaded"
    );

    let server = HttpServer::new(config.api.clone(), store);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}

/// Write an example configuration
fn run_init(output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{:?} already exists, use --force to overwrite", output);
    }
    std::fs::write(&output, WolfTopoConfig::example())
        .with_context(|| format!("failed to write {:?}", output))?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match WolfTopoConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Topology:       {}", config.topology.name);
            println!("  Backend:        {:?}", config.store.backend);
            if let Some(path) = &config.store.path {
                println!("  Store Path:     {}", path.display());
            }
            println!("  Key:            {}{}", config.store.key_prefix, config.topology.name);
            println!("  Max Attempts:   {}", config.retry.max_attempts);
            println!("  API:            {}", config.api.bind_address);
            println!("  Bucket Count:   {}", config.bootstrap.bucket_count);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Print the document or one of its projections as JSON
async fn run_show(
    config: WolfTopoConfig,
    what: ShowTarget,
    instance: Option<String>,
) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    let output = match what {
        ShowTarget::Topology => serde_json::to_string_pretty(&store.get_topology().await?)?,
        ShowTarget::Sharding => serde_json::to_string_pretty(&store.get_sharding_config().await?)?,
        ShowTarget::Routers => serde_json::to_string_pretty(&store.get_routers().await?)?,
        ShowTarget::Storages => serde_json::to_string_pretty(&store.get_storages().await?)?,
        ShowTarget::Masters => {
            serde_json::to_string_pretty(&store.get_replicaset_masters().await?)?
        }
        ShowTarget::Instance => {
            let name = instance.context("--instance is required")?;
            serde_json::to_string_pretty(&store.get_instance_conf(&name).await?)?
        }
    };
    println!("{}", output);
    Ok(())
}
