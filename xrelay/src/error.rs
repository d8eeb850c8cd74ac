//! Error types.

use core::fmt;

/// Errors produced by the relay.
///
/// None of these are fatal to a running relay: the collector and fragmenter
/// log them and skip the smallest unit of work affected.
#[derive(Debug)]
pub enum Error {
    /// The allocator refused a reservation of `requested` bytes.
    AllocationFailed {
        /// Bytes requested.
        requested: usize,
    },

    /// Acquiring `requested` bytes would exceed the memory budget.
    BudgetExhausted {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available under the budget.
        available: usize,
    },

    /// An inbound message is larger than the configured maximum.
    MessageTooLarge {
        /// Length of the refused message.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The other half of the relay channel has been dropped.
    ChannelClosed,

    /// A channel operation did not complete within its timeout.
    Timeout,

    /// A channel operation was cancelled.
    Cancelled,

    /// No peer is connected.
    NotConnected,

    /// The relay configuration is unusable.
    InvalidConfig(&'static str),

    /// A relay task panicked or was aborted.
    TaskFailed,

    /// I/O error from a stream-backed transport.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocationFailed { requested } => {
                write!(f, "Failed to allocate {} bytes", requested)
            }
            Error::BudgetExhausted { requested, available } => write!(
                f,
                "Memory budget exhausted: requested {} bytes, {} available",
                requested, available
            ),
            Error::MessageTooLarge { len, max } => {
                write!(f, "Message of {} bytes exceeds maximum of {}", len, max)
            }
            Error::ChannelClosed => write!(f, "Relay channel closed"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::NotConnected => write!(f, "No peer connected"),
            Error::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
            Error::TaskFailed => write!(f, "Relay task failed"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl Error {
    /// Returns true for the errors the collector treats as "drop this message".
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            Error::AllocationFailed { .. }
                | Error::BudgetExhausted { .. }
                | Error::MessageTooLarge { .. }
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
