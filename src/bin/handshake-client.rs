//! Client entry point: runs one handshake against a server and prints the
//! collected secret chain.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use staged_handshake::core::{DEFAULT_PEER_TAG, DEFAULT_PORT};
use staged_handshake::{ClientConfig, Initiator, PeerTag};

/// Four-stage handshake client.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server host name or address.
    host: String,

    /// Server greeting port.
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Tag written into every header.
    #[arg(short, long, default_value_t = DEFAULT_PEER_TAG)]
    tag: u16,

    /// Milliseconds to wait for acknowledgments before resending.
    #[arg(long, default_value_t = 500)]
    retransmit_ms: u64,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ClientConfig {
        peer_tag: PeerTag(cli.tag),
        retransmit_interval: Duration::from_millis(cli.retransmit_ms),
        ..Default::default()
    };

    let mut initiator = match Initiator::connect(&cli.host, cli.port, config).await {
        Ok(initiator) => initiator,
        Err(e) => {
            error!(host = %cli.host, port = cli.port, error = %e, "cannot start handshake");
            return ExitCode::FAILURE;
        }
    };

    match initiator.run().await {
        Ok(chain) => {
            println!("{}", chain);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(stage = %e.stage, error = %e.source, "handshake failed");
            ExitCode::FAILURE
        }
    }
}
