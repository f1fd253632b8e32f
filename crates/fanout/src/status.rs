use crate::MessageId;

/// The outcome of asking an allocator for the next [`MessageId`].
///
/// - [`Poll::Ready`] carries a freshly issued ID.
/// - [`Poll::Pending`] means the allocator cannot issue an ID until
///   `yield_for` more milliseconds have passed. A `yield_for` of zero means
///   another caller won a race for the same slot and an immediate retry is
///   expected to succeed.
///
/// This allows non-blocking acquisition loops and clean backoff strategies.
///
/// # Example
///
/// ```
/// use fanout::{AtomicIdAllocator, IdAllocator, Poll, TimeSource};
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1
///     }
/// }
///
/// let allocator = AtomicIdAllocator::new(0, FixedTime);
/// match allocator.try_poll_id() {
///     Ok(Poll::Ready { id }) => println!("ID: {id}"),
///     Ok(Poll::Pending { yield_for }) => println!("back off for {yield_for}ms"),
///     Err(e) => println!("allocator failed: {e}"),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<ID = MessageId> {
    /// An ID was issued and is ready to use.
    Ready {
        /// The issued ID.
        id: ID,
    },
    /// No ID could be issued right now.
    Pending {
        /// Milliseconds to wait before trying again.
        yield_for: u64,
    },
}
