use core::time::Duration;
use std::{sync::Arc, time::Instant};

use crate::{AllocError, MessageId, Poll};

/// A source of globally unique [`MessageId`]s.
///
/// Implementations must never return the same ID twice for the lifetime of
/// the system, across any number of concurrent callers. IDs are ordering
/// hints only: a later call on one thread returns a larger ID, but callers
/// must not assume a strict order across threads or nodes.
pub trait IdAllocator {
    /// The node discriminator encoded into every issued ID.
    fn node_id(&self) -> u64;

    /// Attempts to issue the next ID without blocking.
    ///
    /// # Errors
    ///
    /// Returns an [`AllocError`] when the allocator cannot issue IDs at all
    /// (timestamp space exhausted, clock moved too far backwards). Temporary
    /// conditions are reported as [`Poll::Pending`] instead.
    fn try_poll_id(&self) -> Result<Poll, AllocError>;

    /// Issues the next ID, waiting through `Pending` for at most `max_wait`.
    ///
    /// Lost CAS races and single-millisecond waits yield the thread; longer
    /// waits sleep for the time the allocator asks for, capped by the
    /// remaining budget.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::try_poll_id`] and returns
    /// [`AllocError::Stalled`] once the budget is spent.
    fn try_next_id(&self, max_wait: Duration) -> Result<MessageId, AllocError> {
        let start = Instant::now();
        loop {
            match self.try_poll_id()? {
                Poll::Ready { id } => return Ok(id),
                Poll::Pending { yield_for } => {
                    let waited = start.elapsed();
                    if waited >= max_wait {
                        return Err(AllocError::Stalled {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    if yield_for <= 1 {
                        std::thread::yield_now();
                    } else {
                        let remaining = max_wait - waited;
                        std::thread::sleep(Duration::from_millis(yield_for).min(remaining));
                    }
                }
            }
        }
    }
}

impl<A: IdAllocator + ?Sized> IdAllocator for &A {
    fn node_id(&self) -> u64 {
        (**self).node_id()
    }

    fn try_poll_id(&self) -> Result<Poll, AllocError> {
        (**self).try_poll_id()
    }
}

impl<A: IdAllocator + ?Sized> IdAllocator for Arc<A> {
    fn node_id(&self) -> u64 {
        (**self).node_id()
    }

    fn try_poll_id(&self) -> Result<Poll, AllocError> {
        (**self).try_poll_id()
    }
}
