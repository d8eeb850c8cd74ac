use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::*;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tokio_vsock::{VsockAddr, VsockListener};
use xrelay::transport::StreamLink;
use xrelay::{Relay, RelayConfig, RelayHandle, Transport};

/// Accept from any CID.
pub const VMADDR_CID_ANY: u32 = u32::MAX;

#[derive(Debug)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

struct Heartbeat {
    interval: Duration,
    greeting: Vec<u8>,
}

/// Hosts one relay and feeds it one accepted peer at a time.
pub struct LinkServer {
    target: ServerTarget,
    config: RelayConfig,
    heartbeat: Option<Heartbeat>,
}

impl LinkServer {
    pub fn new(target: ServerTarget, config: RelayConfig) -> Self {
        Self {
            target,
            config,
            heartbeat: None,
        }
    }

    /// Logs relay health and submits `greeting` to the connected peer every
    /// `interval`.
    pub fn with_heartbeat(mut self, interval: Duration, greeting: &[u8]) -> Self {
        self.heartbeat = Some(Heartbeat {
            interval,
            greeting: greeting.to_vec(),
        });
        self
    }

    /// Serves until Ctrl-C or a listener error, then shuts the relay down.
    pub async fn run(&self) -> xrelay::Result<()> {
        let link = Arc::new(StreamLink::new());
        let relay = Arc::new(Relay::new(link.clone(), self.config.clone()).spawn()?);

        let stop = CancellationToken::new();
        let heartbeat = self.heartbeat.as_ref().map(|hb| {
            tokio::spawn(heartbeat(
                relay.clone(),
                hb.interval,
                hb.greeting.clone(),
                stop.clone(),
            ))
        });

        let served = tokio::select! {
            result = self.serve(&link) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                Ok(())
            }
        };

        stop.cancel();
        if let Some(task) = heartbeat {
            let _ = task.await;
        }
        link.detach().await;

        let relay = Arc::into_inner(relay).ok_or(xrelay::Error::TaskFailed)?;
        let stats = relay.shutdown().await?;
        info!("Final stats: {:?}", stats);
        served.map_err(xrelay::Error::from)
    }

    async fn serve(&self, link: &StreamLink) -> std::io::Result<()> {
        match &self.target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                info!("Server listening on Unix Socket {:?}", path);
                loop {
                    let (stream, _) = listener.accept().await?;
                    info!("Accepted Unix connection");
                    Self::handle_connection(link, stream).await;
                }
            }
            ServerTarget::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Server listening on TCP {:?}", addr);
                loop {
                    let (stream, peer) = listener.accept().await?;
                    info!("Accepted TCP connection from {:?}", peer);
                    Self::handle_connection(link, stream).await;
                }
            }
            ServerTarget::Vsock { cid, port } => {
                let listener = VsockListener::bind(VsockAddr::new(*cid, *port))?;
                info!("Server listening on Vsock CID:{} Port:{}", cid, port);
                loop {
                    let (stream, addr) = listener.accept().await?;
                    info!("Accepted Vsock connection from {:?}", addr);
                    Self::handle_connection(link, stream).await;
                }
            }
        }
    }

    /// Attaches `stream` as the link's peer and returns once it is gone.
    /// Further connections wait in the listener backlog meanwhile.
    async fn handle_connection<S>(link: &StreamLink, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        link.attach(stream).await;
        link.wait_for_disconnect().await;
        info!("Connection closed");
    }
}

async fn heartbeat(
    relay: Arc<RelayHandle<StreamLink>>,
    interval: Duration,
    greeting: Vec<u8>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let budget = relay.budget();
        info!(
            "Relay is alive, {} bytes buffered, {} queued, {:?}",
            budget.in_use(),
            relay.queued(),
            relay.stats()
        );

        if !relay.transport().is_connected() {
            continue;
        }
        debug!("Sending greeting to peer...");
        tokio::select! {
            _ = stop.cancelled() => break,
            result = relay.submit(&greeting) => {
                if let Err(err) = result {
                    warn!("Greeting not queued: {}", err);
                }
            }
        }
    }
}
