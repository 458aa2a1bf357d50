//! UDP beacon discovery of the mount on the local network.
//!
//! The WiFi bridge announces itself by broadcasting a datagram from its
//! TCP service port at UDP port 55555. The signature is the shape of the
//! datagram, not its content: source port 2000, exactly 110 payload
//! bytes. Anything else on the port is somebody else's traffic.

use std::{net::SocketAddr, time::Duration};

use tokio::{
    net::UdpSocket,
    time::{Instant, timeout_at},
};

use crate::transport::DEFAULT_PORT;

/// UDP port the beacon arrives on.
pub const BEACON_PORT: u16 = 55555;

/// beacon payload is exactly this long
const BEACON_LENGTH: usize = 110;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("beacon socket failed")]
    Io(#[from] std::io::Error),
    #[error("no beacon within {timeout:?}")]
    NoBeacon { timeout: Duration },
}

/// Listen for the bridge's signature datagram and return its TCP address.
pub async fn discover(timeout: Duration) -> Result<SocketAddr, Error> {
    let socket = UdpSocket::bind(("0.0.0.0", BEACON_PORT)).await?;
    let deadline = Instant::now() + timeout;
    let mut buffer = [0u8; 512];

    loop {
        let Ok(received) = timeout_at(deadline, socket.recv_from(&mut buffer)).await else {
            return Err(Error::NoBeacon { timeout });
        };
        let (length, address) = received?;

        if address.port() == DEFAULT_PORT && length == BEACON_LENGTH {
            tracing::debug!(%address, "beacon from the bridge");
            return Ok(SocketAddr::new(address.ip(), DEFAULT_PORT));
        }
        tracing::trace!(%address, length, "ignoring datagram");
    }
}
