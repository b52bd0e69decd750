use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use topogate::{
    adapters::{
        DirectoryTopologyService, GatewayDeployer, HttpClientAdapter, HttpHandler,
        JsonTopologyCodec, TracingAuditor, builtin_registry,
    },
    config::{GatewayConfig, GatewayConfigValidator, TopologyValidator, loader::load_config},
    metrics,
    ports::{Auditor, TopologyParser, TopologyService},
    tracing_setup,
    utils::GracefulShutdown,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "topogate.toml")]
    config: String,

    /// Human-readable log output instead of JSON
    #[clap(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the configuration file and every topology descriptor
    Validate {
        #[clap(short, long, default_value = "topogate.toml")]
        config: String,
    },
    /// Write a starter configuration file and topology directory
    Init {
        #[clap(short, long, default_value = "topogate.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "topogate.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_command(&config).await,
        Some(Commands::Init { config }) => init_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config, args.pretty).await,
        None => serve(&args.config, args.pretty).await,
    }
}

async fn serve(config_path: &str, pretty: bool) -> Result<()> {
    if pretty {
        tracing_setup::init_console_tracing()?;
    } else {
        tracing_setup::init_tracing()?;
    }

    tracing::info!("Loading configuration from {config_path}");
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;

    if config.metrics_enabled {
        let metrics_addr: SocketAddr = config
            .metrics_address
            .parse()
            .context("Failed to parse metrics address")?;
        metrics::install_prometheus_exporter(metrics_addr)?;
    }
    metrics::init_metrics()?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let client = Arc::new(
        HttpClientAdapter::new(config.backend_timeout()).context("Failed to create HTTP client")?,
    );
    let auditor: Arc<dyn Auditor> = Arc::new(TracingAuditor);
    let deployer = Arc::new(GatewayDeployer::new(Arc::new(builtin_registry(client))));

    let topologies = DirectoryTopologyService::builder(config.topology.clone())
        .auditor(auditor.clone())
        .build();
    topologies.add_listener(deployer.clone());
    topologies.reload().await;
    topologies
        .start()
        .await
        .context("Failed to start topology monitor")?;

    let handler = Arc::new(HttpHandler::new(
        deployer.clone(),
        auditor,
        &config.gateway_path,
    ));
    let app = handler
        .router()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        "topogate listening on {} (gateway path /{}, topologies in {})",
        addr,
        config.gateway_path.trim_matches('/'),
        config.topology.directory.display()
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_task = {
        let shutdown = graceful_shutdown.clone();
        let topologies = topologies.clone();
        tokio::spawn(async move {
            let reload = move || {
                let topologies = topologies.clone();
                tokio::spawn(async move {
                    topologies.reload().await;
                });
            };
            if let Err(e) = shutdown.run_signal_handler(reload).await {
                tracing::error!("Signal handler failed: {:#}", e);
            }
        })
    };

    let server_result = tokio::select! {
        result = axum::serve(listener, app) => result.context("Server error"),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            Ok(())
        }
    };

    let drained = graceful_shutdown
        .drain(async {
            topologies.stop().await;
        })
        .await;
    signal_task.abort();
    deployer.shutdown();
    tracing::info!("Graceful shutdown completed (clean: {})", drained);

    server_result
}

/// Validate the configuration file and every topology descriptor, then exit.
async fn validate_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        return Err(eyre!("Configuration file '{config_path}' not found"));
    }

    let config: GatewayConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to parse {config_path}"))?;
    GatewayConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;
    println!("Configuration: OK");
    println!("  listen address:     {}", config.listen_addr);
    println!("  gateway path:       /{}", config.gateway_path.trim_matches('/'));
    println!("  topology directory: {}", config.topology.directory.display());

    let settings = &config.topology;
    let mut entries = match tokio::fs::read_dir(&settings.directory).await {
        Ok(entries) => entries,
        Err(e) => {
            println!("Topology directory unreadable ({e}); nothing else to check");
            return Ok(());
        }
    };

    let mut failures = 0usize;
    let mut checked = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| settings.accepts_extension(e));
        if !accepted {
            continue;
        }
        checked += 1;

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let verdict = JsonTopologyCodec
            .parse(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|topology| {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                let mut topology = topology;
                topology.name = stem.to_string();
                TopologyValidator::validate(&topology).map_err(|e| e.to_string())
            });
        match verdict {
            Ok(()) => println!("Topology {}: OK", path.display()),
            Err(e) => {
                failures += 1;
                println!("Topology {}: {e}", path.display());
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{failures} of {checked} topologies failed validation"));
    }
    println!("{checked} topologies valid");
    Ok(())
}

/// Write a starter configuration and an example topology.
async fn init_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        return Err(eyre!("Configuration file '{config_path}' already exists"));
    }

    let default_config = r#"# topogate configuration

listen_addr = "127.0.0.1:8443"
# Requests to /gateway/<topology>/... are dispatched by that topology
gateway_path = "gateway"
backend_timeout_ms = 30000
metrics_enabled = true
metrics_address = "127.0.0.1:9090"

[topology]
directory = "conf/topologies"
extensions = ["json", "conf"]
poll_interval_ms = 1000
strict_validation = false
watch_events = true
"#;

    let sandbox = r#"{
  "providers": [
    { "role": "webappsec", "name": "WebAppSec", "params": { "xframe.options.value": "SAMEORIGIN" } }
  ],
  "services": [
    { "role": "WEBHDFS", "urls": ["http://localhost:50070/webhdfs"] }
  ]
}
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;

    let topology_dir = Path::new("conf/topologies");
    tokio::fs::create_dir_all(topology_dir)
        .await
        .context("Failed to create topology directory")?;
    let sandbox_path = topology_dir.join("sandbox.json");
    if !sandbox_path.exists() {
        tokio::fs::write(&sandbox_path, sandbox)
            .await
            .context("Failed to write example topology")?;
    }

    println!("Created {config_path} and {}", sandbox_path.display());
    println!("Run 'topogate serve --config {config_path}' to start the gateway");
    Ok(())
}
