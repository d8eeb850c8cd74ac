mod link_client;

use std::path::PathBuf;
use std::time::Duration;

use log::*;

use crate::link_client::{ClientTarget, LinkClient};

const SOCKET_PATH: &str = "/tmp/xrelay.sock";
const DEFAULT_SERVER_CID: u32 = 3;
const DEFAULT_SERVER_PORT: u32 = 1234;
const TRANSFER_UNIT: u16 = 247;
const REPLY_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Picks the server from the first argument: `tcp:<addr>`,
/// `vsock[:<cid>]` or `unix[:<path>]`. Defaults to the Unix socket.
fn target_from_args() -> ClientTarget {
    let arg = std::env::args().nth(1).unwrap_or_default();
    let (kind, value) = arg.split_once(':').unwrap_or((arg.as_str(), ""));

    match kind {
        "tcp" => ClientTarget::Tcp(value.parse().expect("Invalid TCP address")),
        "vsock" => ClientTarget::Vsock {
            cid: if value.is_empty() {
                DEFAULT_SERVER_CID
            } else {
                value.parse().expect("Invalid vsock CID")
            },
            port: DEFAULT_SERVER_PORT,
        },
        _ if value.is_empty() => ClientTarget::Unix(PathBuf::from(SOCKET_PATH)),
        _ => ClientTarget::Unix(PathBuf::from(value)),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let long: Vec<u8> = b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(600)
        .collect();
    let messages: [&[u8]; 2] = [b"Hello, relay!", &long];

    let client = LinkClient::new(target_from_args())
        .with_transfer_unit(TRANSFER_UNIT)
        .with_idle_timeout(REPLY_IDLE_TIMEOUT);

    match client.exchange(&messages).await {
        Ok(fragments) => info!("Exchange finished, {} fragments received", fragments.len()),
        Err(err) => {
            error!("Exchange failed: {}", err);
            std::process::exit(1);
        }
    }
}
