//! Owned message buffers and fragment scratch regions.
//!
//! A [`MessageBuffer`] is created by the collector for one inbound message
//! and moved through the relay channel to the fragmenter, which drops it
//! once every fragment has been handed to the transport. A [`Fragment`]
//! borrows nothing: it is a copy of one slice of the buffer plus the
//! terminator byte the send primitive expects.

use core::ops::Deref;

use crate::error::{Error, Result};
use crate::memory::{Lease, MemoryBudget};
use crate::{FRAGMENT_TERMINATOR, MAX_TRANSFER_UNIT};

/// An inbound message, exclusively owned by whoever holds it.
#[derive(Debug)]
pub struct MessageBuffer {
    /// Message payload, sized exactly to the message.
    data: Vec<u8>,

    /// Budget held for the payload.
    _lease: Lease,
}

impl MessageBuffer {
    /// Copies `message` into a new buffer.
    ///
    /// Fails without side effects if the message exceeds `max_len`, if the
    /// budget cannot cover it, or if the allocator refuses the reservation.
    pub fn copy_from(message: &[u8], budget: &MemoryBudget, max_len: usize) -> Result<Self> {
        if message.len() > max_len {
            return Err(Error::MessageTooLarge {
                len: message.len(),
                max: max_len,
            });
        }

        let lease = budget.try_acquire(message.len())?;

        let mut data = Vec::new();
        data.try_reserve_exact(message.len())
            .map_err(|_| Error::AllocationFailed {
                requested: message.len(),
            })?;
        data.extend_from_slice(message);

        Ok(Self {
            data,
            _lease: lease,
        })
    }

    /// Returns the message length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length message.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the message payload.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for MessageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Scratch region holding one fragment and its terminator.
#[derive(Debug)]
pub struct Fragment {
    /// Payload followed by [`FRAGMENT_TERMINATOR`].
    bytes: heapless::Vec<u8, MAX_TRANSFER_UNIT>,

    /// Budget held for `payload.len() + 1` bytes.
    _lease: Lease,
}

impl Fragment {
    /// Copies `payload` into a fresh scratch region and terminates it.
    pub fn prepare(payload: &[u8], budget: &MemoryBudget) -> Result<Self> {
        let total = payload.len() + 1;
        let lease = budget.try_acquire(total)?;

        let mut bytes = heapless::Vec::new();
        bytes
            .extend_from_slice(payload)
            .map_err(|_| Error::AllocationFailed { requested: total })?;
        bytes
            .push(FRAGMENT_TERMINATOR)
            .map_err(|_| Error::AllocationFailed { requested: total })?;

        Ok(Self {
            bytes,
            _lease: lease,
        })
    }

    /// Returns the framed bytes handed to the send primitive.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the payload without the terminator.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    /// Returns the payload length.
    pub fn payload_len(&self) -> usize {
        self.bytes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from() {
        let budget = MemoryBudget::unlimited();
        let buffer = MessageBuffer::copy_from(b"Hello", &budget, 64).unwrap();

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.as_slice(), b"Hello");
        assert_eq!(&buffer[1..3], b"el");
        assert_eq!(budget.in_use(), 5);

        drop(buffer);
        assert_eq!(budget.in_use(), 0);
        assert_eq!(budget.outstanding(), 0);
    }

    #[test]
    fn test_copy_from_too_large() {
        let budget = MemoryBudget::unlimited();
        let result = MessageBuffer::copy_from(&[0u8; 65], &budget, 64);

        assert!(matches!(result, Err(Error::MessageTooLarge { len: 65, max: 64 })));
        assert_eq!(budget.leases_issued(), 0);
    }

    #[test]
    fn test_copy_from_over_budget() {
        let budget = MemoryBudget::new(4);
        let result = MessageBuffer::copy_from(b"Hello", &budget, 64);

        assert!(matches!(result, Err(Error::BudgetExhausted { .. })));
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn test_empty_message() {
        let budget = MemoryBudget::unlimited();
        let buffer = MessageBuffer::copy_from(&[], &budget, 64).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragment_terminated() {
        let budget = MemoryBudget::unlimited();
        let fragment = Fragment::prepare(b"abc", &budget).unwrap();

        assert_eq!(fragment.as_bytes(), b"abc\0");
        assert_eq!(fragment.payload(), b"abc");
        assert_eq!(fragment.payload_len(), 3);
        assert_eq!(budget.in_use(), 4);
    }

    #[test]
    fn test_fragment_larger_than_scratch() {
        let budget = MemoryBudget::unlimited();
        let payload = [0u8; MAX_TRANSFER_UNIT];
        let result = Fragment::prepare(&payload, &budget);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        // Lease released on the error path.
        assert_eq!(budget.in_use(), 0);
    }
}
