//! Relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the collector and the fragmenter.
#[derive(Debug, Default)]
pub struct RelayStats {
    messages_received: AtomicU64,
    messages_enqueued: AtomicU64,
    messages_submitted: AtomicU64,
    messages_dropped: AtomicU64,
    messages_discarded: AtomicU64,
    messages_relayed: AtomicU64,
    messages_abandoned: AtomicU64,
    fragments_sent: AtomicU64,
    fragments_failed: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Complete messages read from the transport.
    pub messages_received: u64,

    /// Messages handed to the relay channel, submitted ones included.
    pub messages_enqueued: u64,

    /// Messages queued locally through `RelayHandle::submit`.
    pub messages_submitted: u64,

    /// Messages dropped because no buffer could be obtained.
    pub messages_dropped: u64,

    /// Messages discarded because the peer disconnected before enqueue.
    pub messages_discarded: u64,

    /// Messages whose every fragment was offered to the transport.
    pub messages_relayed: u64,

    /// Messages cut short because no scratch region could be obtained.
    pub messages_abandoned: u64,

    /// Fragments accepted by the transport.
    pub fragments_sent: u64,

    /// Fragments the transport refused.
    pub fragments_failed: u64,

    /// Payload bytes in accepted fragments, terminators excluded.
    pub bytes_sent: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl RelayStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn message_received(&self) {
        bump(&self.messages_received, 1);
    }

    pub(crate) fn message_enqueued(&self) {
        bump(&self.messages_enqueued, 1);
    }

    pub(crate) fn message_submitted(&self) {
        bump(&self.messages_submitted, 1);
        bump(&self.messages_enqueued, 1);
    }

    pub(crate) fn message_dropped(&self) {
        bump(&self.messages_dropped, 1);
    }

    pub(crate) fn message_discarded(&self) {
        bump(&self.messages_discarded, 1);
    }

    pub(crate) fn message_relayed(&self) {
        bump(&self.messages_relayed, 1);
    }

    pub(crate) fn message_abandoned(&self) {
        bump(&self.messages_abandoned, 1);
    }

    pub(crate) fn fragment_sent(&self, payload_len: usize) {
        bump(&self.fragments_sent, 1);
        bump(&self.bytes_sent, payload_len as u64);
    }

    pub(crate) fn fragment_failed(&self) {
        bump(&self.fragments_failed, 1);
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: load(&self.messages_received),
            messages_enqueued: load(&self.messages_enqueued),
            messages_submitted: load(&self.messages_submitted),
            messages_dropped: load(&self.messages_dropped),
            messages_discarded: load(&self.messages_discarded),
            messages_relayed: load(&self.messages_relayed),
            messages_abandoned: load(&self.messages_abandoned),
            fragments_sent: load(&self.fragments_sent),
            fragments_failed: load(&self.fragments_failed),
            bytes_sent: load(&self.bytes_sent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = RelayStats::new();
        stats.message_received();
        stats.message_enqueued();
        stats.fragment_sent(22);
        stats.fragment_sent(10);
        stats.fragment_failed();
        stats.message_submitted();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_enqueued, 2);
        assert_eq!(snap.messages_submitted, 1);
        assert_eq!(snap.fragments_sent, 2);
        assert_eq!(snap.fragments_failed, 1);
        assert_eq!(snap.bytes_sent, 32);
        assert_eq!(snap.messages_dropped, 0);
    }
}
