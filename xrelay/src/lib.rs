//! # XRelay - Flow-Controlled Fragmenting Relay
//!
//! XRelay moves messages received over a short-range link back out through
//! the link's transmit path, re-chunked to the transfer unit negotiated for
//! the current session:
//!
//! - **Bounded hand-off**: a fixed-capacity FIFO channel between two tasks
//! - **Backpressure**: a full channel suspends the inbound side
//! - **Live transfer unit**: re-read before every fragment
//! - **Single ownership**: buffers move through the channel, never shared
//! - **Best effort**: failed fragments are skipped, not retried
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Transport                          │
//! │   is_connected · read_message · send · transfer unit     │
//! └──────┬───────────────────────────────────────▲───────────┘
//!        │ complete messages                     │ fragments
//! ┌──────▼──────┐    ┌─────────────────┐    ┌────┴────────┐
//! │  Collector  ├───►│  Relay Channel  ├───►│ Fragmenter  │
//! │             │    │  (N slots FIFO) │    │             │
//! └─────────────┘    └─────────────────┘    └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xrelay::{Relay, RelayConfig, transport::LoopbackLink};
//!
//! let link = Arc::new(LoopbackLink::new(247));
//! let handle = Relay::new(link.clone(), RelayConfig::default()).spawn()?;
//!
//! link.connect();
//! link.push_message(b"Hello, World!");
//! link.wait_for_sent(1).await;
//!
//! handle.shutdown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod channel;
pub mod collector;
pub mod config;
pub mod dump;
pub mod error;
pub mod fragmenter;
pub mod memory;
pub mod relay;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use buffer::{Fragment, MessageBuffer};
pub use channel::{RelayReceiver, RelaySender, Wait, relay_channel};
pub use config::RelayConfig;
pub use dump::DumpLevel;
pub use error::{Error, Result};
pub use memory::MemoryBudget;
pub use relay::{Relay, RelayHandle};
pub use stats::StatsSnapshot;
pub use transport::Transport;

/// Smallest transfer unit a link can negotiate (BLE ATT default MTU).
pub const MIN_TRANSFER_UNIT: usize = 23;

/// Largest transfer unit a link can negotiate.
pub const MAX_TRANSFER_UNIT: usize = 517;

/// Byte appended to every fragment for the send primitive.
pub const FRAGMENT_TERMINATOR: u8 = 0x00;

/// Default number of buffer slots in the relay channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Default largest inbound message accepted.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65535;
