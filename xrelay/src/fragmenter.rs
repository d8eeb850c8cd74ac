//! Outbound fragmenter.
//!
//! Drains the relay channel one [`MessageBuffer`] at a time and offers it
//! to the transport in fragments of at most `transfer_unit - 1` payload
//! bytes, the last byte of every fragment being the terminator the send
//! primitive expects. The transfer unit is read again before each
//! fragment, so a unit renegotiated mid-message takes effect on the very
//! next fragment.
//!
//! A fragment the transport refuses is logged and skipped, never retried:
//! the peer may receive a message with interior fragments missing. The
//! relay favours liveness over completeness and leaves recovery to the
//! application protocol.

use std::sync::Arc;

use log::{error, info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::buffer::{Fragment, MessageBuffer};
use crate::channel::{RelayReceiver, Wait};
use crate::config::RelayConfig;
use crate::dump::{DumpLevel, dump_packet};
use crate::error::{Error, Result};
use crate::memory::MemoryBudget;
use crate::stats::RelayStats;
use crate::transport::{Transport, clamp_transfer_unit};

const TARGET: &str = "xrelay::tx";

/// What happened to one message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Fragments the transport accepted.
    pub fragments_sent: usize,

    /// Fragments the transport refused.
    pub fragments_failed: usize,

    /// Payload bytes offered to the transport, accepted or not.
    pub bytes_offered: usize,

    /// True if a scratch region could not be obtained and the rest of the
    /// message was skipped.
    pub abandoned: bool,
}

/// Splits queued messages into transfer-unit sized fragments.
pub struct Fragmenter<T: Transport> {
    /// Shared link.
    transport: Arc<T>,

    /// Consumer half of the relay channel.
    receiver: RelayReceiver,

    /// Budget charged for every scratch region.
    budget: MemoryBudget,

    /// Shared counters.
    stats: Arc<RelayStats>,

    /// Diagnostic verbosity.
    dump_level: DumpLevel,

    /// Wait policy for an empty channel.
    dequeue_wait: Wait,
}

impl<T: Transport> Fragmenter<T> {
    /// Creates a fragmenter. Nothing happens until [`Fragmenter::run`].
    pub fn new(
        transport: Arc<T>,
        receiver: RelayReceiver,
        budget: MemoryBudget,
        stats: Arc<RelayStats>,
        config: &RelayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            receiver,
            budget,
            stats,
            dump_level: config.dump_level,
            dequeue_wait: Wait::Cancellable(shutdown),
        }
    }

    /// Relays messages until shutdown or until every producer is gone.
    ///
    /// Shutdown is only observed between messages; a dequeued message is
    /// always fragmented to the end.
    pub async fn run(mut self) -> Result<()> {
        info!(target: TARGET, "Fragmenter started");

        loop {
            let buffer = match self.receiver.dequeue_with(&self.dequeue_wait).await {
                Ok(buffer) => buffer,
                Err(Error::Cancelled) | Err(Error::ChannelClosed) => break,
                Err(err) => {
                    error!(target: TARGET, "Fragmenter stopping: {}", err);
                    return Err(err);
                }
            };

            self.relay_message(buffer).await;
        }

        info!(target: TARGET, "Fragmenter stopped");
        Ok(())
    }

    /// Sends every fragment of `buffer`, then releases it.
    pub async fn relay_message(&self, buffer: MessageBuffer) -> MessageOutcome {
        let mut outcome = MessageOutcome::default();
        let mut offset = 0;

        while offset < buffer.len() {
            let transfer_unit = clamp_transfer_unit(self.transport.current_transfer_unit());
            let size = (buffer.len() - offset).min(transfer_unit - 1);

            let fragment = match Fragment::prepare(&buffer[offset..offset + size], &self.budget) {
                Ok(fragment) => fragment,
                Err(err) => {
                    warn!(
                        target: TARGET,
                        "Failed to prepare fragment at offset {}/{}: {}", offset, buffer.len(), err
                    );
                    outcome.abandoned = true;
                    break;
                }
            };

            if self.transport.send(fragment.as_bytes()).await {
                trace!(target: TARGET, "Sent {} bytes at offset {}", size, offset);
                dump_packet(TARGET, self.dump_level, transfer_unit, fragment.payload());
                self.stats.fragment_sent(size);
                outcome.fragments_sent += 1;
            } else {
                warn!(target: TARGET, "Failed to send fragment data or no peer connected");
                self.stats.fragment_failed();
                outcome.fragments_failed += 1;
            }

            drop(fragment);
            outcome.bytes_offered += size;
            offset += size;
        }

        if outcome.abandoned {
            self.stats.message_abandoned();
        } else {
            self.stats.message_relayed();
        }

        // Released exactly once, after the last fragment borrowed from it.
        drop(buffer);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use rstest::rstest;

    use super::*;
    use crate::channel::relay_channel;
    use crate::transport::LoopbackLink;

    fn fragmenter(link: &Arc<LoopbackLink>, budget: &MemoryBudget) -> Fragmenter<LoopbackLink> {
        let (_tx, rx) = relay_channel(NonZeroUsize::new(1).unwrap());
        Fragmenter::new(
            link.clone(),
            rx,
            budget.clone(),
            Arc::new(RelayStats::new()),
            &RelayConfig::default(),
            CancellationToken::new(),
        )
    }

    fn message(budget: &MemoryBudget, len: usize) -> MessageBuffer {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        MessageBuffer::copy_from(&data, budget, usize::MAX).unwrap()
    }

    #[rstest]
    #[case(0, 247, 0)]
    #[case(1, 247, 1)]
    #[case(246, 247, 1)]
    #[case(247, 247, 2)]
    #[case(600, 247, 3)]
    #[case(100, 23, 5)]
    #[tokio::test]
    async fn test_fragment_count(#[case] len: usize, #[case] unit: usize, #[case] expected: usize) {
        let link = Arc::new(LoopbackLink::new(unit));
        link.connect();
        let budget = MemoryBudget::unlimited();

        let outcome = fragmenter(&link, &budget).relay_message(message(&budget, len)).await;

        assert_eq!(outcome.fragments_sent, expected);
        assert_eq!(outcome.bytes_offered, len);
        assert!(link.sent().iter().all(|f| f.payload().len() < unit));
        assert_eq!(budget.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_fragments_reassemble() {
        let link = Arc::new(LoopbackLink::new(64));
        link.connect();
        let budget = MemoryBudget::unlimited();
        let buffer = message(&budget, 500);
        let original = buffer.as_slice().to_vec();

        fragmenter(&link, &budget).relay_message(buffer).await;

        let mut joined = Vec::new();
        for fragment in link.sent() {
            assert_eq!(fragment.bytes.last(), Some(&crate::FRAGMENT_TERMINATOR));
            joined.extend_from_slice(fragment.payload());
        }
        assert_eq!(joined, original);
    }

    #[tokio::test]
    async fn test_transfer_unit_shrinks_mid_message() {
        let link = Arc::new(LoopbackLink::new(247));
        link.connect();
        link.set_transfer_unit_after(1, 50);
        let budget = MemoryBudget::unlimited();

        let outcome = fragmenter(&link, &budget).relay_message(message(&budget, 600)).await;

        let sent = link.sent();
        assert_eq!(sent[0].payload().len(), 246);
        for fragment in &sent[1..] {
            assert_eq!(fragment.transfer_unit, 50);
            assert!(fragment.payload().len() <= 49);
        }
        let total: usize = sent.iter().map(|f| f.payload().len()).sum();
        assert_eq!(total, 600);
        // 246 + 7 * 49 + 11
        assert_eq!(sent.len(), 9);
        assert_eq!(outcome.fragments_sent, 9);
    }

    #[tokio::test]
    async fn test_send_failure_skips_fragment() {
        let link = Arc::new(LoopbackLink::new(11));
        link.connect();
        link.fail_send(1);
        let budget = MemoryBudget::unlimited();

        let outcome = fragmenter(&link, &budget).relay_message(message(&budget, 100)).await;

        // Unit 11 clamps to 23: 22-byte fragments.
        let sent = link.sent();
        assert_eq!(sent.len(), 5);
        assert!(!sent[1].accepted);
        assert_eq!(outcome.fragments_sent, 4);
        assert_eq!(outcome.fragments_failed, 1);
        assert_eq!(outcome.bytes_offered, 100);
        assert!(!outcome.abandoned);
        assert_eq!(budget.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_scratch_failure_abandons_message() {
        let link = Arc::new(LoopbackLink::new(247));
        link.connect();
        // The buffer itself uses the whole budget.
        let budget = MemoryBudget::new(300);
        let buffer = message(&budget, 300);

        let outcome = fragmenter(&link, &budget).relay_message(buffer).await;

        assert!(outcome.abandoned);
        assert_eq!(outcome.fragments_sent, 0);
        assert_eq!(link.sent_count(), 0);
        assert_eq!(budget.in_use(), 0);
        assert_eq!(budget.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_link_does_not_stall() {
        let link = Arc::new(LoopbackLink::new(0));
        let budget = MemoryBudget::unlimited();

        let outcome = fragmenter(&link, &budget).relay_message(message(&budget, 50)).await;

        assert_eq!(outcome.fragments_failed, 3);
        assert_eq!(outcome.bytes_offered, 50);
    }
}
