//! Inbound collector.
//!
//! Waits for a peer, then reads complete messages from the transport,
//! copies each into an owned [`MessageBuffer`] and enqueues it on the relay
//! channel. A full channel suspends the collector, which is the relay's
//! only form of backpressure towards the link.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageBuffer;
use crate::channel::{RelaySender, Wait};
use crate::config::RelayConfig;
use crate::dump::{DumpLevel, dump_packet};
use crate::error::{Error, Result};
use crate::memory::MemoryBudget;
use crate::stats::RelayStats;
use crate::transport::Transport;

const TARGET: &str = "xrelay::rx";

/// Why a peer session stopped being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The transport reported disconnection.
    Disconnected,

    /// The relay is shutting down.
    Shutdown,
}

/// Reads inbound messages and feeds them to the relay channel.
pub struct Collector<T: Transport> {
    /// Shared link.
    transport: Arc<T>,

    /// Producer half of the relay channel.
    sender: RelaySender,

    /// Budget charged for every message buffer.
    budget: MemoryBudget,

    /// Shared counters.
    stats: Arc<RelayStats>,

    /// Diagnostic verbosity.
    dump_level: DumpLevel,

    /// Largest message accepted.
    max_message_size: usize,

    /// Fires when the relay shuts down.
    shutdown: CancellationToken,

    /// Wait policy for a full channel.
    enqueue_wait: Wait,

    /// Receive buffer lent to the transport on every read.
    rx_buf: Vec<u8>,
}

impl<T: Transport> Collector<T> {
    /// Creates a collector. Nothing happens until [`Collector::run`].
    pub fn new(
        transport: Arc<T>,
        sender: RelaySender,
        budget: MemoryBudget,
        stats: Arc<RelayStats>,
        config: &RelayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            sender,
            budget,
            stats,
            dump_level: config.dump_level,
            max_message_size: config.max_message_size,
            enqueue_wait: Wait::Cancellable(shutdown.clone()),
            shutdown,
            rx_buf: Vec::new(),
        }
    }

    /// Collects messages until shutdown.
    ///
    /// Returns `Ok(())` when cancelled and [`Error::ChannelClosed`] if the
    /// fragmenter side of the channel is gone.
    pub async fn run(mut self) -> Result<()> {
        info!(target: TARGET, "Collector started");

        loop {
            info!(target: TARGET, "Waiting for connection...");
            if self.wait_for_connection().await == SessionEnd::Shutdown {
                break;
            }
            info!(target: TARGET, "Connected!");

            match self.collect_session().await {
                Ok(SessionEnd::Disconnected) => info!(target: TARGET, "Disconnected"),
                Ok(SessionEnd::Shutdown) => break,
                Err(err) => {
                    error!(target: TARGET, "Collector stopping: {}", err);
                    return Err(err);
                }
            }
        }

        info!(target: TARGET, "Collector stopped");
        Ok(())
    }

    async fn wait_for_connection(&self) -> SessionEnd {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => SessionEnd::Shutdown,
            _ = self.transport.wait_for_connection() => SessionEnd::Disconnected,
        }
    }

    /// Reads the next message into `rx_buf`. `None` means the peer is gone
    /// or the relay is shutting down.
    async fn read_next_message(&mut self) -> Option<usize> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            len = self.transport.read_message(&mut self.rx_buf) => len,
        }
    }

    async fn collect_session(&mut self) -> Result<SessionEnd> {
        loop {
            let Some(len) = self.read_next_message().await else {
                return Ok(if self.shutdown.is_cancelled() {
                    SessionEnd::Shutdown
                } else {
                    SessionEnd::Disconnected
                });
            };
            self.stats.message_received();

            let message = &self.rx_buf[..len.min(self.rx_buf.len())];
            dump_packet(
                TARGET,
                self.dump_level,
                self.transport.current_transfer_unit(),
                message,
            );

            let buffer = match MessageBuffer::copy_from(message, &self.budget, self.max_message_size) {
                Ok(buffer) => buffer,
                Err(err) if err.is_allocation_failure() => {
                    warn!(target: TARGET, "Dropping {}-byte message: {}", len, err);
                    self.stats.message_dropped();
                    continue;
                }
                Err(err) => return Err(err),
            };

            // Only forward what was complete while the peer was still there.
            if !self.transport.is_connected() {
                debug!(target: TARGET, "Peer gone before enqueue, discarding {} bytes", buffer.len());
                self.stats.message_discarded();
                return Ok(SessionEnd::Disconnected);
            }

            match self.sender.enqueue_with(buffer, &self.enqueue_wait).await {
                Ok(()) => self.stats.message_enqueued(),
                Err(err) => {
                    return match err.into_error() {
                        Error::Cancelled => Ok(SessionEnd::Shutdown),
                        other => Err(other),
                    };
                }
            }
        }
    }
}
