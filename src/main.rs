//! MongoDB Lens core entry point.
//!
//! Connects to MongoDB, keeps the connection healthy in the background and
//! waits for a termination signal. Protocol handlers embed [`LensServer`]
//! and drive it through their own transport.
//!
//! Usage: `mongo-lens-mcp [MONGODB_URI]`

use anyhow::Result;
use mongo_lens_mcp::shutdown::{install_signal_handlers, new_shutdown_controller};
use mongo_lens_mcp::{Config, LensServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?.with_uri_override(std::env::args().nth(1));

    // Logs go to stderr; stdout belongs to the protocol transport.
    init_logging(config.verbose_logging);

    // After logging, so a broken config file is reported.
    let config = config.merge_config_file();

    let version = env!("CARGO_PKG_VERSION");
    info!("MongoDB Lens v{} starting...", version);

    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] {}", info);
    }));

    let shutdown_controller = new_shutdown_controller();
    install_signal_handlers(shutdown_controller.clone()).await;

    let server = LensServer::new(config);
    if let Err(e) = server.connect().await {
        error!("Failed to connect to MongoDB: {}", e);
        if let Some(hint) = e.suggestion() {
            error!("{}", hint);
        }
        std::process::exit(1);
    }

    server.start_watchdog();
    info!(
        "Connected to database '{}'. Ready.",
        server.current_database_name().unwrap_or_default()
    );

    let mut shutdown_signal = shutdown_controller.signal();
    shutdown_signal.recv().await;

    shutdown_controller.graceful_shutdown(&server).await;
    Ok(())
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins; otherwise `VERBOSE_LOGGING` switches the crate to debug.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "warn,mongo_lens_mcp=debug"
    } else {
        "warn,mongo_lens_mcp=info"
    };
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
