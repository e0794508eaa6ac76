//! Integration tests for the full four-stage handshake.
//!
//! Each test binds a real responder on loopback, runs its accept loop in a
//! background task and drives an initiator against it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use staged_handshake::{
    ClientConfig, Initiator, Responder, Secret, ServerConfig, SessionReport,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Server {
    addr: SocketAddr,
    reports: mpsc::Receiver<SessionReport>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<staged_handshake::Result<()>>,
}

/// Small fixed parameters so the sessions finish quickly.
fn server_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        num_range: 3..=3,
        length_range: 8..=8,
        num2_range: 2..=2,
        len2_range: 4..=4,
        fill: Some(b'X'),
        ..Default::default()
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        retransmit_interval: Duration::from_millis(50),
        max_retransmit_rounds: 100,
        ..Default::default()
    }
}

async fn start_server(config: ServerConfig) -> Server {
    let mut responder = Responder::bind(config).await.expect("bind responder");
    let addr = responder.local_addr().expect("responder address");
    let reports = responder.session_reports(8);
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(responder.serve(async move {
        let _ = stopped.await;
    }));
    Server {
        addr,
        reports,
        stop,
        task,
    }
}

async fn next_report(server: &mut Server) -> SessionReport {
    tokio::time::timeout(Duration::from_secs(5), server.reports.recv())
        .await
        .expect("session report timed out")
        .expect("report channel closed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides should agree on the same four secrets after a clean run.
#[tokio::test]
async fn handshake_chain_matches_on_both_sides() {
    let mut server = start_server(server_config()).await;

    let mut initiator = Initiator::new(server.addr, client_config()).expect("client config");
    let chain = tokio::time::timeout(Duration::from_secs(10), initiator.run())
        .await
        .expect("handshake timed out")
        .expect("handshake failed");

    let report = next_report(&mut server).await;
    let server_chain = report.outcome.expect("server session failed");
    assert_eq!(chain, server_chain);
    assert_eq!(initiator.session().chain(), Some(chain));

    for secret in [chain.a, chain.b, chain.c, chain.d] {
        assert_ne!(secret, Secret::NONE);
    }
}

/// Withheld acknowledgments are recovered by retransmission.
#[tokio::test]
async fn handshake_survives_dropped_acks() {
    let config = ServerConfig {
        num_range: 10..=10,
        ack_drop_probability: 0.3,
        ..server_config()
    };
    let mut server = start_server(config).await;

    let mut initiator = Initiator::new(server.addr, client_config()).expect("client config");
    let chain = initiator.run().await.expect("handshake failed");

    let report = next_report(&mut server).await;
    assert_eq!(report.outcome.expect("server session failed"), chain);
}

/// A malformed greeting gets no reply and does not disturb later clients.
#[tokio::test]
async fn bogus_greeting_is_ignored() {
    let mut server = start_server(server_config()).await;

    let intruder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    intruder.connect(server.addr).await.unwrap();
    intruder.send(b"definitely not a frame").await.unwrap();

    let mut buf = [0u8; 64];
    let reply = tokio::time::timeout(Duration::from_millis(200), intruder.recv(&mut buf)).await;
    assert!(reply.is_err(), "server answered a bogus greeting");

    let mut initiator = Initiator::new(server.addr, client_config()).expect("client config");
    let chain = initiator.run().await.expect("handshake failed");
    let report = next_report(&mut server).await;
    assert_eq!(report.outcome.expect("server session failed"), chain);
}

/// Several clients run concurrently, each with its own secrets.
#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let mut server = start_server(server_config()).await;

    let clients: Vec<_> = (0..3)
        .map(|_| {
            let addr = server.addr;
            tokio::spawn(async move {
                let mut initiator = Initiator::new(addr, client_config()).expect("client config");
                initiator.run().await.expect("handshake failed")
            })
        })
        .collect();

    let mut chains = Vec::new();
    for client in clients {
        chains.push(client.await.expect("client task panicked"));
    }

    let mut reported = Vec::new();
    for _ in 0..3 {
        reported.push(next_report(&mut server).await.outcome.expect("server session failed"));
    }
    for chain in &chains {
        assert!(reported.contains(chain));
    }
}

/// The accept loop returns once the shutdown future resolves.
#[tokio::test]
async fn server_stops_on_shutdown() {
    let server = start_server(server_config()).await;
    server.stop.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), server.task)
        .await
        .expect("server did not stop")
        .expect("server task panicked");
    assert!(result.is_ok());
}
