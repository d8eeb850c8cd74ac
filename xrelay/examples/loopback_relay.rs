//! Relays a few messages over the in-memory loopback link.
//!
//! This example shows how to:
//! - Start a relay over a transport
//! - Watch messages being re-chunked to the transfer unit
//! - Renegotiate the transfer unit in the middle of a message
//!
//! Run with: cargo run --example loopback_relay

use std::sync::Arc;

use xrelay::dump::hex_ascii_lines;
use xrelay::transport::LoopbackLink;
use xrelay::{DumpLevel, Relay, RelayConfig};

#[tokio::main]
async fn main() -> xrelay::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== XRelay Loopback Example ===\n");

    let link = Arc::new(LoopbackLink::new(23));
    let config = RelayConfig::new()
        .with_channel_capacity(4)
        .with_dump_level(DumpLevel::Summary);
    let relay = Relay::new(link.clone(), config).spawn()?;

    // Example 1: short message at the default transfer unit
    println!("1. Default transfer unit (23):");
    link.connect();
    link.push_message(b"Hello, World!\n");
    link.wait_for_sent(1).await;
    let sent = link.sent();
    for line in hex_ascii_lines(&sent[0].bytes) {
        println!("   {}", line);
    }

    // Example 2: longer message after an MTU exchange
    println!("\n2. Transfer unit 64, 150-byte message:");
    link.set_transfer_unit(64);
    let message: Vec<u8> = (0..150).map(|i| b'a' + (i % 26) as u8).collect();
    link.push_message(&message);
    link.wait_for_sent(4).await;
    for fragment in &link.sent()[1..4] {
        println!(
            "   fragment: {} payload bytes (unit {})",
            fragment.payload().len(),
            fragment.transfer_unit
        );
    }

    // Example 3: the peer shrinks the unit mid-message
    println!("\n3. Transfer unit 247 shrinking to 50 after one fragment:");
    link.set_transfer_unit(247);
    link.set_transfer_unit_after(5, 50);
    link.push_message(&[0x5A; 600]);
    link.wait_for_sent(13).await;
    let sizes: Vec<usize> = link.sent()[4..].iter().map(|f| f.payload().len()).collect();
    println!("   fragment sizes: {:?}", sizes);
    println!("   total: {} bytes", sizes.iter().sum::<usize>());

    let stats = relay.shutdown().await?;
    println!("\n4. Final stats:");
    println!("   messages relayed: {}", stats.messages_relayed);
    println!("   fragments sent:   {}", stats.fragments_sent);
    println!("   bytes sent:       {}", stats.bytes_sent);

    println!("\n=== Loopback Example Complete ===");
    Ok(())
}
