//! MLLP server entry point.
//!
//! ```text
//! mllp-server                  Run with mllp-server.toml (or defaults)
//! mllp-server --config <path>  Load a custom config TOML
//! mllp-server --port 2575      Override the listening port
//! mllp-server --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mllp_core::Listener;
use mllp_server::config::ServerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mllp-server", about = "HL7 MLLP acknowledgment listener")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mllp-server.toml")]
    config: PathBuf,

    /// Override the listening port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the worker-pool capacity.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(workers) = cli.workers {
        config.network.workers = workers;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mllp-server v{}", env!("CARGO_PKG_VERSION"));
    info!("audit backend: {:?}", config.audit.backend);

    let store = config.open_store().await?;
    let listener = Listener::bind(config.to_listener_config(), store).await?;
    info!("listening on {}", listener.local_addr()?);

    // Ctrl-C handler.
    let stop = listener.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    listener.run().await?;

    Ok(())
}
