//! Relay configuration.

use std::time::Duration;

use crate::dump::DumpLevel;
use crate::error::{Error, Result};
use crate::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_MESSAGE_SIZE};

/// Relay configuration, fixed once the relay is spawned.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Number of buffer slots in the relay channel.
    pub channel_capacity: usize,

    /// Diagnostic verbosity for inbound messages and outbound fragments.
    pub dump_level: DumpLevel,

    /// Byte cap shared by message buffers and fragment scratch regions.
    /// `None` means unlimited.
    pub memory_budget: Option<usize>,

    /// Largest inbound message the collector will accept.
    pub max_message_size: usize,

    /// How long `RelayHandle::submit` waits on a full channel.
    /// `None` waits forever.
    pub submit_timeout: Option<Duration>,
}

impl RelayConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            dump_level: DumpLevel::Off,
            memory_budget: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            submit_timeout: None,
        }
    }

    /// Sets the number of buffer slots in the relay channel.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the diagnostic verbosity.
    pub fn with_dump_level(mut self, level: DumpLevel) -> Self {
        self.dump_level = level;
        self
    }

    /// Caps the bytes held by buffers and scratch regions at once.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Sets the largest message the relay accepts.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Bounds how long `RelayHandle::submit` waits for a free slot.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    /// Checks the configuration before any task is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel capacity must be non-zero"));
        }
        if self.max_message_size == 0 {
            return Err(Error::InvalidConfig("max message size must be non-zero"));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.dump_level, DumpLevel::Off);
        assert!(config.memory_budget.is_none());
        assert!(config.submit_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RelayConfig::new()
            .with_channel_capacity(4)
            .with_dump_level(DumpLevel::Hex)
            .with_memory_budget(4096)
            .with_max_message_size(1024)
            .with_submit_timeout(Duration::from_millis(50));

        assert_eq!(config.channel_capacity, 4);
        assert_eq!(config.dump_level, DumpLevel::Hex);
        assert_eq!(config.memory_budget, Some(4096));
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.submit_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RelayConfig::new().with_channel_capacity(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = RelayConfig::new().with_max_message_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
