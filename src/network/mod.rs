//! Transport plumbing for the handshake
//!
//! This module holds the two stage engines and the socket helpers the roles
//! share.

pub mod reliable;
pub mod stream;

pub use self::reliable::{
    receive_all, send_all, AckPolicy, AlwaysAck, RandomAckDrop, ReceiveOutcome,
    RetransmitConfig, SenderEvent, TransferReceiver, TransferSender,
};
pub use self::stream::{exchange_stream, serve_stream};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use crate::core::{Error, Result};

/// Resolves `host` and picks the first address
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::config(format!("{} did not resolve to any address", host)))
}

/// Wildcard address of the same family as `remote`, on an ephemeral port
pub fn local_for(remote: SocketAddr) -> SocketAddr {
    let ip = match remote {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Ephemeral-port address on the same interface as `bind`
pub fn ephemeral(bind: SocketAddr) -> SocketAddr {
    SocketAddr::new(bind.ip(), 0)
}

/// UDP socket connected to `remote`
pub async fn connected_udp(remote: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(local_for(remote)).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

/// Receives one datagram on a connected socket, bounding the wait
pub async fn recv_within(
    socket: &UdpSocket,
    buf: &mut [u8],
    wait: Duration,
    what: &str,
) -> Result<usize> {
    match timeout(wait, socket.recv(buf)).await {
        Ok(received) => Ok(received?),
        Err(_) => Err(Error::timeout(format!("no {} within {:?}", what, wait))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_for_matches_family() {
        let v4: SocketAddr = "10.1.2.3:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert_eq!(local_for(v4), "0.0.0.0:0".parse().unwrap());
        assert_eq!(local_for(v6), "[::]:0".parse().unwrap());
        assert_eq!(ephemeral("127.0.0.1:12235".parse().unwrap()).port(), 0);
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve("127.0.0.1", 12235).await.unwrap();
        assert_eq!(addr, "127.0.0.1:12235".parse().unwrap());
    }

    #[tokio::test]
    async fn test_recv_within_times_out() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = connected_udp(peer.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let err = recv_within(&socket, &mut buf, Duration::from_millis(20), "reply")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
