mod link_server;

use std::path::PathBuf;
use std::time::Duration;

use log::*;
use xrelay::{DumpLevel, RelayConfig};

use crate::link_server::{LinkServer, ServerTarget};

const SOCKET_PATH: &str = "/tmp/xrelay.sock";
const VSOCK_PORT: u32 = 1234;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);
const GREETING: &[u8] = b"Hello, World!\n";

/// Picks the listener from the first argument: `tcp:<addr>`, `vsock[:<port>]`
/// or `unix[:<path>]`. Defaults to the Unix socket.
fn target_from_args() -> ServerTarget {
    let arg = std::env::args().nth(1).unwrap_or_default();
    let (kind, value) = arg.split_once(':').unwrap_or((arg.as_str(), ""));

    match kind {
        "tcp" => ServerTarget::Tcp(value.parse().expect("Invalid TCP address")),
        "vsock" => ServerTarget::Vsock {
            cid: link_server::VMADDR_CID_ANY,
            port: if value.is_empty() {
                VSOCK_PORT
            } else {
                value.parse().expect("Invalid vsock port")
            },
        },
        _ if value.is_empty() => ServerTarget::Unix(PathBuf::from(SOCKET_PATH)),
        _ => ServerTarget::Unix(PathBuf::from(value)),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::new()
        .with_dump_level(DumpLevel::Summary)
        .with_submit_timeout(SUBMIT_TIMEOUT);
    let server = LinkServer::new(target_from_args(), config)
        .with_heartbeat(HEARTBEAT_INTERVAL, GREETING);

    if let Err(err) = server.run().await {
        error!("Server stopped: {}", err);
        std::process::exit(1);
    }
}
