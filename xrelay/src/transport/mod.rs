//! Transport layer abstraction.
//!
//! The relay never owns the link. It consumes a connected/disconnected
//! signal and the current transfer unit, and calls the read and send
//! primitives through the [`Transport`] trait.
//!
//! # Implementations
//!
//! - `LoopbackLink`: scripted in-memory link for testing
//! - `StreamLink`: length-prefixed messages over any tokio byte stream
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xrelay::transport::{LoopbackLink, Transport};
//!
//! let link = Arc::new(LoopbackLink::new(247));
//! link.connect();
//! link.push_message(b"Hello");
//!
//! let mut buf = Vec::new();
//! let len = link.read_message(&mut buf).await;
//! assert_eq!(len, Some(5));
//! ```

use core::future::Future;

use crate::{MAX_TRANSFER_UNIT, MIN_TRANSFER_UNIT};

mod loopback;
mod stream;

pub use loopback::{LoopbackLink, SentFragment};
pub use stream::{CONTROL_TRANSFER_UNIT, StreamLink};

/// The primitives the relay needs from the link.
///
/// Implementations are shared between the collector and the fragmenter
/// behind an `Arc`, so every method takes `&self`.
pub trait Transport: Send + Sync + 'static {
    /// Returns true while a peer session is active.
    fn is_connected(&self) -> bool;

    /// Returns the current maximum fragment size, terminator included.
    ///
    /// May change at any time; the fragmenter reads it before every
    /// fragment.
    fn current_transfer_unit(&self) -> usize;

    /// Suspends until a peer is connected.
    fn wait_for_connection(&self) -> impl Future<Output = ()> + Send;

    /// Suspends until one complete inbound message has been written into
    /// `buf`, returning its length, or until the peer disconnects, returning
    /// `None`.
    ///
    /// `buf` is owned by the caller and reused between reads; its contents
    /// are only valid until the next call.
    fn read_message(&self, buf: &mut Vec<u8>) -> impl Future<Output = Option<usize>> + Send;

    /// Offers one framed fragment for transmission.
    ///
    /// Returns false if the fragment was dropped or no peer is connected.
    /// True means accepted for transmission, not delivered.
    fn send(&self, fragment: &[u8]) -> impl Future<Output = bool> + Send;
}

/// Clamps a reported transfer unit into the range the link can negotiate.
///
/// A disconnected link may report 0; the floor keeps every fragment
/// non-empty.
pub fn clamp_transfer_unit(raw: usize) -> usize {
    raw.clamp(MIN_TRANSFER_UNIT, MAX_TRANSFER_UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_transfer_unit() {
        assert_eq!(clamp_transfer_unit(0), MIN_TRANSFER_UNIT);
        assert_eq!(clamp_transfer_unit(22), MIN_TRANSFER_UNIT);
        assert_eq!(clamp_transfer_unit(247), 247);
        assert_eq!(clamp_transfer_unit(4096), MAX_TRANSFER_UNIT);
    }
}
