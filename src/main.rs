//! phantom-tcp echo server.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                      SERVER                          │
//!   TCP client       │  ┌──────────┐   ┌───────────┐   ┌─────────────────┐  │
//!   ─────────────────┼─▶│ listener │──▶│ keepalive │──▶│   connection    │  │
//!                    │  │  accept  │   │  options  │   │ read  ─▶ queue  │  │
//!                    │  └──────────┘   └───────────┘   │ dispatch ─▶ H   │  │
//!   ◀────────────────┼─────────────────────────────────│ write ◀─ queue  │  │
//!                    │                                 └─────────────────┘  │
//!                    │  ┌────────────────────────────────────────────────┐  │
//!                    │  │ config │ observability │ lifecycle (shutdown)  │  │
//!                    │  └────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use phantom_tcp::config::{load_config, validate_config, ConfigError, ProtocolKind, ServerConfig};
use phantom_tcp::handler::EchoHandler;
use phantom_tcp::lifecycle::shutdown_signal;
use phantom_tcp::observability::{logging, metrics};
use phantom_tcp::protocol::{DelimitedProtocol, LengthPrefixedProtocol, LengthWidth, Protocol};
use phantom_tcp::{Server, ServerError};

#[derive(Parser)]
#[command(name = "phantom-tcp")]
#[command(about = "Framed TCP echo server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.host`.
    #[arg(long)]
    host: Option<String>,

    /// Override `listener.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability)?;

    tracing::info!("phantom-tcp v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        address = %config.listener.address(),
        network = %config.listener.network,
        protocol = ?config.protocol.kind,
        send_capacity = config.queues.send_capacity,
        receive_capacity = config.queues.receive_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let handler = EchoHandler::new(config.handler.write_timeout());
    match config.protocol.kind {
        ProtocolKind::Delimited => {
            let protocol =
                DelimitedProtocol::new(config.protocol.delimiter, config.protocol.max_frame_len);
            run(config, protocol, handler).await?;
        }
        ProtocolKind::LengthPrefixed => {
            let width = LengthWidth::from_bytes(config.protocol.length_width)
                .ok_or("protocol.length_width must be 1, 2 or 4")?;
            let protocol = LengthPrefixedProtocol::new(width, config.protocol.max_frame_len);
            run(config, protocol, handler).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Serve until a termination signal or a fatal accept error, then drain.
async fn run<P: Protocol>(
    config: ServerConfig,
    protocol: P,
    handler: EchoHandler,
) -> Result<(), ServerError> {
    let server: Server<P, EchoHandler> = Server::new(config, protocol, handler);
    let listener = server.listen().await?;

    let result = tokio::select! {
        result = server.serve(listener) => result,
        _ = shutdown_signal() => Ok(()),
    };

    server.stop().await;
    result
}
