use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_vsock::{VsockAddr, VsockStream};
use xrelay::FRAGMENT_TERMINATOR;
use xrelay::dump::hex_ascii_lines;
use xrelay::transport::CONTROL_TRANSFER_UNIT;

#[derive(Debug)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

/// A peer for the relay server: requests a transfer unit, sends framed
/// messages and collects the fragments relayed back.
pub struct LinkClient {
    target: ClientTarget,
    transfer_unit: u16,
    idle_timeout: Duration,
}

impl LinkClient {
    pub fn new(target: ClientTarget) -> Self {
        Self {
            target,
            transfer_unit: xrelay::MIN_TRANSFER_UNIT as u16,
            idle_timeout: Duration::from_secs(1),
        }
    }

    /// Transfer unit requested from the server.
    pub fn with_transfer_unit(mut self, transfer_unit: u16) -> Self {
        self.transfer_unit = transfer_unit;
        self
    }

    /// How long to wait for more fragments before giving up.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sends `messages` and returns the payloads of every fragment received
    /// until the server goes quiet.
    pub async fn exchange(&self, messages: &[&[u8]]) -> io::Result<Vec<Vec<u8>>> {
        info!("Connecting to target: {:?}", self.target);
        match &self.target {
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                info!("Unix socket connected.");
                self.process_stream(stream, messages).await
            }
            ClientTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                info!("TCP socket connected.");
                self.process_stream(stream, messages).await
            }
            ClientTarget::Vsock { cid, port } => {
                let stream = VsockStream::connect(VsockAddr::new(*cid, *port)).await?;
                info!("Vsock socket connected.");
                self.process_stream(stream, messages).await
            }
        }
    }

    async fn process_stream<S>(&self, mut stream: S, messages: &[&[u8]]) -> io::Result<Vec<Vec<u8>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = encode_request(self.transfer_unit, messages)?;
        let start = Instant::now();
        stream.write_all(&request).await?;
        stream.flush().await?;
        info!(
            "Sent {} messages ({} bytes) asking for transfer unit {} in {:?}",
            messages.len(),
            request.len(),
            self.transfer_unit,
            start.elapsed()
        );

        let start = Instant::now();
        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match tokio::time::timeout(self.idle_timeout, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    info!("Server closed the connection");
                    break;
                }
                Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
                Ok(Err(err)) => return Err(err),
                Err(_) => break,
            }
        }

        let fragments = split_fragments(&received);
        info!(
            "=== Receive Complete === {} bytes, {} fragments in {:?}",
            received.len(),
            fragments.len(),
            start.elapsed()
        );
        for (index, fragment) in fragments.iter().enumerate() {
            info!("Fragment {}: {} bytes", index, fragment.len());
            for line in hex_ascii_lines(fragment) {
                debug!("{}", line);
            }
        }
        Ok(fragments)
    }
}

/// Frames a transfer unit control record followed by every message.
pub fn encode_request(transfer_unit: u16, messages: &[&[u8]]) -> io::Result<Vec<u8>> {
    let mut request = CONTROL_TRANSFER_UNIT.to_be_bytes().to_vec();
    request.extend_from_slice(&transfer_unit.to_be_bytes());

    for message in messages {
        let len = u16::try_from(message.len())
            .ok()
            .filter(|len| *len != CONTROL_TRANSFER_UNIT)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "message too long to frame")
            })?;
        request.extend_from_slice(&len.to_be_bytes());
        request.extend_from_slice(message);
    }
    Ok(request)
}

/// Splits relayed bytes on the fragment terminator. Only meaningful for
/// payloads that never contain the terminator themselves.
pub fn split_fragments(received: &[u8]) -> Vec<Vec<u8>> {
    received
        .split_inclusive(|byte| *byte == FRAGMENT_TERMINATOR)
        .map(|fragment| {
            fragment
                .strip_suffix(&[FRAGMENT_TERMINATOR])
                .unwrap_or(fragment)
                .to_vec()
        })
        .collect()
}
