//! TCP link to the mount's WiFi bridge.

use std::time::Duration;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};

/// TCP port the bridge listens on.
pub const DEFAULT_PORT: u16 = 2000;

/// settle time around the command-mode escape sequence
const HANDSHAKE_DELAY: Duration = Duration::from_secs(1);

/// An open, transparent byte channel to the AUX bus.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    /// Connect to the bridge and force it into transparent forwarding.
    pub async fn connect<A: ToSocketAddrs>(address: A) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(address).await?;
        tracing::debug!("connected, exiting bridge command mode");
        exit_command_mode(&mut stream).await?;
        Ok(Self { stream })
    }

    pub(crate) fn into_inner(self) -> TcpStream {
        self.stream
    }
}

/// The bridge boots in (or a previous client may have left it in) `$$$`
/// command mode, where it would swallow AUX bytes. Entering command mode
/// and leaving it again lands in transparent forwarding either way. The
/// pauses let the bridge's UART settle between the escape sequences.
pub(crate) async fn exit_command_mode<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::sleep(HANDSHAKE_DELAY).await;
    writer.write_all(b"$$$").await?;
    writer.flush().await?;
    tokio::time::sleep(HANDSHAKE_DELAY).await;
    writer.write_all(b"exit\r\n").await?;
    writer.flush().await?;
    tokio::time::sleep(HANDSHAKE_DELAY).await;
    Ok(())
}
