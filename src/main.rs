//! Entry point for `udp-transfer`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, socket binding).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use udp_transfer::config::{DEFAULT_CLIENT_CEILING, DEFAULT_PORT};
use udp_transfer::message::{CHUNK_SIZE, DEFAULT_CEILING};
use udp_transfer::resource::{FileResources, FileSink};
use udp_transfer::{Client, ClientConfig, DeliveryConfig, Server, ServerConfig, Socket};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve files to one client at a time.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
        bind: SocketAddr,
        /// Directory that resource identifiers are resolved against.
        /// Without it, identifiers are plain paths.
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Wait per chunk acknowledgment, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        ack_timeout_ms: u64,
        /// Abort an active session after this much silence, in milliseconds.
        #[arg(long, default_value_t = 5000)]
        session_timeout_ms: u64,
        /// Window ceiling for clients that do not name one.
        #[arg(long, default_value_t = DEFAULT_CEILING)]
        default_ceiling: usize,
        /// Payload characters per chunk.
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk_size: usize,
        /// Give up on a transfer after this many collapsed rounds in a row.
        #[arg(long)]
        max_collapses: Option<u32>,
    },
    /// Fetch one resource from a server.
    Client {
        /// Server address (e.g. 127.0.0.1:32000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Resource to request.
        #[arg(short, long)]
        resource: String,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Window ceiling to request.
        #[arg(short, long, default_value_t = DEFAULT_CLIENT_CEILING)]
        ceiling: usize,
        /// File the received content is appended to.
        #[arg(short, long, default_value = "output.txt")]
        output: PathBuf,
        /// Give up after this much silence from the server, in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        idle_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            root,
            ack_timeout_ms,
            session_timeout_ms,
            default_ceiling,
            chunk_size,
            max_collapses,
        } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding server socket to {bind}"))?;
            let resources = match root {
                Some(dir) => FileResources::rooted(dir),
                None => FileResources::new(),
            };
            let config = ServerConfig {
                chunk_size,
                default_ceiling,
                session_timeout: Duration::from_millis(session_timeout_ms),
                delivery: DeliveryConfig {
                    ack_timeout: Duration::from_millis(ack_timeout_ms),
                    max_consecutive_collapses: max_collapses,
                },
            };
            log::info!("Starting server on {}", socket.local_addr);
            Server::new(socket, resources, config).run().await;
        }
        Mode::Client {
            server,
            resource,
            bind,
            ceiling,
            output,
            idle_timeout_ms,
        } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding client socket to {bind}"))?;
            let config = ClientConfig {
                ceiling: Some(ceiling),
                idle_timeout: Some(Duration::from_millis(idle_timeout_ms)),
            };
            log::info!("Starting client, fetching {resource:?} from {server}");
            let mut client = Client::new(socket, server, FileSink::new(&output), config);
            let report = client
                .fetch(&resource)
                .await
                .with_context(|| format!("fetching {resource:?} from {server}"))?;
            println!(
                "Wrote {} chunk(s), {} character(s) to {}",
                report.chunks,
                report.chars,
                output.display()
            );
        }
    }

    Ok(())
}
