//! Byte budget shared by every allocation the relay makes.
//!
//! Each message buffer and fragment scratch region holds a [`Lease`] for
//! its size. Dropping the owner drops the lease and returns the bytes, so
//! the counters show at any time how many buffers are alive and whether
//! each one was released exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Error, Result};

#[derive(Debug)]
struct BudgetInner {
    /// Maximum bytes that may be leased at once.
    limit: usize,

    /// Bytes currently leased.
    in_use: AtomicUsize,

    /// Leases handed out since creation.
    issued: AtomicU64,

    /// Leases dropped since creation.
    returned: AtomicU64,
}

/// Shared byte budget. Cloning yields another handle to the same budget.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    inner: Arc<BudgetInner>,
}

impl MemoryBudget {
    /// Creates a budget capped at `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                in_use: AtomicUsize::new(0),
                issued: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a budget that only counts.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Builds the budget described by an optional cap.
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unlimited, Self::new)
    }

    /// Returns the configured cap.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Returns the bytes currently leased.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Returns the bytes that can still be leased.
    pub fn available(&self) -> usize {
        self.inner.limit.saturating_sub(self.in_use())
    }

    /// Returns the number of leases ever issued.
    pub fn leases_issued(&self) -> u64 {
        self.inner.issued.load(Ordering::Acquire)
    }

    /// Returns the number of leases released.
    pub fn leases_returned(&self) -> u64 {
        self.inner.returned.load(Ordering::Acquire)
    }

    /// Returns the number of leases still alive.
    pub fn outstanding(&self) -> u64 {
        self.leases_issued() - self.leases_returned()
    }

    /// Leases `bytes` from the budget.
    pub fn try_acquire(&self, bytes: usize) -> Result<Lease> {
        let limit = self.inner.limit;
        self.inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map_err(|used| Error::BudgetExhausted {
                requested: bytes,
                available: limit.saturating_sub(used),
            })?;

        self.inner.issued.fetch_add(1, Ordering::AcqRel);
        Ok(Lease {
            budget: Arc::clone(&self.inner),
            bytes,
        })
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Bytes held against a [`MemoryBudget`]; returned on drop.
#[derive(Debug)]
pub struct Lease {
    budget: Arc<BudgetInner>,
    bytes: usize,
}

impl Lease {
    /// Returns the number of bytes this lease holds.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.budget.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
        self.budget.returned.fetch_add(1, Ordering::AcqRel);
    }
}
