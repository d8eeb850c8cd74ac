//! Relay composition.
//!
//! [`Relay::spawn`] builds the channel, hands one half each to a
//! [`Collector`] and a [`Fragmenter`], and runs both as tokio tasks. The
//! returned [`RelayHandle`] is the only way back in: local submission,
//! statistics and shutdown.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageBuffer;
use crate::channel::{RelaySender, Wait, relay_channel};
use crate::collector::Collector;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::fragmenter::Fragmenter;
use crate::memory::MemoryBudget;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::transport::Transport;

/// A relay ready to be started over `transport`.
pub struct Relay<T: Transport> {
    transport: Arc<T>,
    config: RelayConfig,
}

impl<T: Transport> Relay<T> {
    /// Creates a relay over `transport`. Nothing runs until [`Relay::spawn`].
    pub fn new(transport: Arc<T>, config: RelayConfig) -> Self {
        Self { transport, config }
    }

    /// Creates a relay with the default configuration.
    pub fn with_defaults(transport: Arc<T>) -> Self {
        Self::new(transport, RelayConfig::default())
    }

    /// Validates the configuration and starts both tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<RelayHandle<T>> {
        self.config.validate()?;
        let capacity = NonZeroUsize::new(self.config.channel_capacity)
            .ok_or(Error::InvalidConfig("channel capacity must be non-zero"))?;

        let (sender, receiver) = relay_channel(capacity);
        let budget = MemoryBudget::from_limit(self.config.memory_budget);
        let stats = Arc::new(RelayStats::new());
        let shutdown = CancellationToken::new();

        let collector = Collector::new(
            Arc::clone(&self.transport),
            sender.clone(),
            budget.clone(),
            Arc::clone(&stats),
            &self.config,
            shutdown.child_token(),
        );
        let fragmenter = Fragmenter::new(
            Arc::clone(&self.transport),
            receiver,
            budget.clone(),
            Arc::clone(&stats),
            &self.config,
            shutdown.child_token(),
        );

        info!(
            "Relay starting: channel capacity {}, budget {:?}",
            capacity, self.config.memory_budget
        );

        Ok(RelayHandle {
            transport: self.transport,
            sender,
            budget,
            stats,
            shutdown,
            submit_wait: Wait::from_timeout(self.config.submit_timeout),
            max_message_size: self.config.max_message_size,
            collector: tokio::spawn(collector.run()),
            fragmenter: tokio::spawn(fragmenter.run()),
        })
    }
}

/// Handle to a running relay.
pub struct RelayHandle<T: Transport> {
    transport: Arc<T>,
    sender: RelaySender,
    budget: MemoryBudget,
    stats: Arc<RelayStats>,
    shutdown: CancellationToken,
    submit_wait: Wait,
    max_message_size: usize,
    collector: JoinHandle<Result<()>>,
    fragmenter: JoinHandle<Result<()>>,
}

impl<T: Transport> RelayHandle<T> {
    /// Queues locally produced data for transmission to the peer.
    ///
    /// Refuses with [`Error::NotConnected`] when no peer is there to send
    /// to. Otherwise waits on a full channel as configured by
    /// `RelayConfig::submit_timeout`.
    pub async fn submit(&self, data: &[u8]) -> Result<()> {
        if !self.transport.is_connected() {
            debug!("No device connected, not queueing {} bytes", data.len());
            return Err(Error::NotConnected);
        }

        let buffer = MessageBuffer::copy_from(data, &self.budget, self.max_message_size)?;
        self.sender
            .enqueue_with(buffer, &self.submit_wait)
            .await
            .map_err(|err| err.into_error())?;
        self.stats.message_submitted();
        Ok(())
    }

    /// Returns the relay counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the shared memory budget.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Returns the number of buffers waiting for the fragmenter.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Returns the transport the relay runs over.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns true once both tasks have exited.
    pub fn is_finished(&self) -> bool {
        self.collector.is_finished() && self.fragmenter.is_finished()
    }

    /// Stops both tasks and waits for them.
    ///
    /// A message the fragmenter is working on is finished first. Buffers
    /// still queued are released without being sent. Returns the final
    /// counters.
    pub async fn shutdown(self) -> Result<StatsSnapshot> {
        info!("Relay shutting down");
        self.shutdown.cancel();
        drop(self.sender);

        let (collector, fragmenter) = futures::future::join(self.collector, self.fragmenter).await;
        let collector = collector.map_err(|_| Error::TaskFailed)?;
        let fragmenter = fragmenter.map_err(|_| Error::TaskFailed)?;

        let stats = self.stats.snapshot();
        info!("Relay stopped: {:?}", stats);
        collector.and(fragmenter).map(|()| stats)
    }
}

