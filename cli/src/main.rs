//! pairwatch CLI: watch Uniswap factories for new pairs and pools.
//!
//! Usage:
//! ```bash
//! # Watch with a config file (default: ./pairwatch.toml)
//! pairwatch run --config pairwatch.toml
//!
//! # Validate a config file without connecting
//! pairwatch check-config --config pairwatch.toml
//!
//! # List built-in network profiles
//! pairwatch networks
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use pairwatch_core::config::WatcherConfig;
use pairwatch_core::decode::{FactoryKind, PairCreatedHandler};
use pairwatch_core::network::Network;
use pairwatch_core::router::EventRouter;
use pairwatch_core::sink::{EventSink, TracingSink};
use pairwatch_core::trust::{CachedTrustCheck, StaticTrustCheck, TrustCheck};
use pairwatch_http::{validate_factories, GoPlusTrustCheck, HttpRpcClient};
use pairwatch_ws::{Watcher, WsConnector};

mod logging;

#[derive(Parser)]
#[command(
    name = "pairwatch",
    about = "Watch Uniswap V2/V3 factories for newly created pairs and pools",
    long_about = "
pairwatch keeps one WebSocket log subscription open against a node provider,
decodes PairCreated / PoolCreated events and checks both tokens with GoPlus.

ENVIRONMENT VARIABLES:
  PAIRWATCH_WS_URL         Provider WebSocket URL (overrides provider.ws_url)
  PAIRWATCH_GOPLUS_TOKEN   GoPlus access token
  RUST_LOG                 Log filter (overrides log.level)
",
    version
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "pairwatch.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and report new pairs until interrupted (default)
    Run {
        /// Only report pairs whose tokens both pass the trust check
        #[arg(long)]
        clean: bool,
        /// Override the configured network
        #[arg(long)]
        network: Option<String>,
        /// Skip the eth_getCode factory check
        #[arg(long)]
        no_validate: bool,
    },

    /// Load and validate the config, then print the resolved filter
    #[command(name = "check-config")]
    CheckConfig,

    /// List built-in network profiles
    Networks,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        clean: false,
        network: None,
        no_validate: false,
    }) {
        Commands::Networks => {
            cmd_networks();
            Ok(())
        }
        Commands::CheckConfig => cmd_check_config(&cli.config),
        Commands::Run {
            clean,
            network,
            no_validate,
        } => {
            let mut config = load_config(&cli.config)?;
            if clean {
                config.clean_mode = true;
            }
            if let Some(name) = network {
                config.network = parse_network(&name)?;
            }
            if no_validate {
                config.validate_factories = false;
            }
            config.validate()?;
            logging::init_tracing(&config.log, cli.verbose);
            cmd_run(config).await
        }
    }
}

fn load_config(path: &Path) -> Result<WatcherConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let mut config = WatcherConfig::parse(&content)?;
    config.apply_env();
    Ok(config)
}

fn parse_network(name: &str) -> Result<Network> {
    Network::ALL
        .into_iter()
        .find(|n| n.to_string() == name.to_ascii_lowercase())
        .with_context(|| format!("unknown network `{name}`, see `pairwatch networks`"))
}

fn cmd_networks() {
    println!("{:<10} {:>8}  {:<44} {:<44}", "NETWORK", "CHAIN", "V2 FACTORY", "V3 FACTORY");
    for network in Network::ALL {
        let show = |kind: FactoryKind| {
            network
                .factory(kind)
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<10} {:>8}  {:<44} {:<44}",
            network.to_string(),
            network.chain_id(),
            show(FactoryKind::V2),
            show(FactoryKind::V3)
        );
    }
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = WatcherConfig::load(path)?;

    println!("config OK: {}", path.display());
    println!("  network     {} (chain {})", config.network, config.network.chain_id());
    println!("  provider    {}", config.provider.ws_url);
    println!("  clean mode  {}", config.clean_mode);
    for (kind, address) in config.factories() {
        println!("  {kind} factory  {address}  topic {}", config.topic(kind));
    }
    println!(
        "  admission   rate {}/{}ms (max {}), open after {} failures for {}ms",
        config.admission.initial_rate,
        config.admission.window.as_millis(),
        config.admission.max_rate,
        config.admission.failure_threshold,
        config.admission.recovery_timeout.as_millis()
    );
    println!(
        "  buffer      {} events, batches of {} / {}ms",
        config.buffer.capacity,
        config.batch.size,
        config.batch.timeout.as_millis()
    );
    Ok(())
}

fn build_trust(config: &WatcherConfig) -> Result<Arc<dyn TrustCheck>> {
    if !config.trust.enabled {
        tracing::warn!("trust checks disabled, every token is reported as untrusted");
        return Ok(Arc::new(StaticTrustCheck::default()));
    }
    let goplus = GoPlusTrustCheck::new(
        config.trust.endpoint.clone(),
        config.trust_chain_id(),
        config.trust.access_token.clone(),
        config.trust.timeout,
    )?;
    Ok(Arc::new(CachedTrustCheck::new(Arc::new(goplus), config.trust.cache.clone())))
}

async fn cmd_run(config: WatcherConfig) -> Result<()> {
    let factories = config.factories();

    if config.validate_factories {
        let rpc = HttpRpcClient::new(config.http_url(), config.provider.connect_timeout)?;
        validate_factories(&rpc, &factories).await?;
    }

    let trust = build_trust(&config)?;
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let router = Arc::new(factories.iter().fold(EventRouter::new(), |router, (kind, address)| {
        let handler = PairCreatedHandler::new(*kind, trust.clone(), sink.clone(), config.clean_mode);
        router.route(*address, Arc::new(handler))
    }));

    let connector = WsConnector::new(config.provider.ws_url.clone(), config.provider.connect_timeout);
    let watcher = Watcher::new(&config, Arc::new(connector), router.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                return;
            }
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        });
    }

    let routes: Vec<String> = router.addresses().map(|a| a.to_string()).collect();
    tracing::info!(
        network = %config.network,
        routes = router.len(),
        addresses = ?routes,
        clean_mode = config.clean_mode,
        "watching for new pairs"
    );
    watcher.run(shutdown).await?;
    Ok(())
}
