//! Server entry point: answers greetings until interrupted.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use staged_handshake::core::{DEFAULT_PEER_TAG, DEFAULT_PORT};
use staged_handshake::network::resolve;
use staged_handshake::{PeerTag, Responder, SequencePolicy, ServerConfig};

/// Four-stage handshake server.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address to bind.
    #[arg(default_value = "0.0.0.0")]
    host: String,

    /// Greeting port.
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Tag written into every header.
    #[arg(short, long, default_value_t = DEFAULT_PEER_TAG)]
    tag: u16,

    /// Probability of withholding a transfer acknowledgment, in [0, 1).
    #[arg(long, default_value_t = 0.0)]
    ack_drop: f64,

    /// Fixed fill character for stream frames; random when omitted.
    #[arg(long)]
    fill: Option<char>,

    /// Keep the expected packet id on an out-of-turn packet instead of restarting at 0.
    #[arg(long)]
    resume: bool,

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

async fn run(cli: Cli) -> staged_handshake::Result<()> {
    let fill = match cli.fill {
        Some(c) if c.is_ascii() => Some(c as u8),
        Some(c) => {
            return Err(staged_handshake::Error::config(format!(
                "fill character {:?} is not ASCII",
                c
            )))
        }
        None => None,
    };

    let config = ServerConfig {
        bind_addr: resolve(&cli.host, cli.port).await?,
        peer_tag: PeerTag(cli.tag),
        fill,
        ack_drop_probability: cli.ack_drop,
        sequence_policy: if cli.resume {
            SequencePolicy::Resume
        } else {
            SequencePolicy::FullReset
        },
        ..Default::default()
    };

    let responder = Responder::bind(config).await?;
    info!(addr = %responder.local_addr()?, "server ready");
    responder
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for interrupt");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}
