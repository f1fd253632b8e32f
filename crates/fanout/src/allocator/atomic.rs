use core::cmp;

use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{AllocError, IdAllocator, MessageId, Poll, TimeSource};

/// Default backward clock movement tolerated before the allocator gives up.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 5_000;

/// A lock-free [`MessageId`] allocator for one node.
///
/// The whole (timestamp, node, sequence) state lives in a single
/// [`AtomicU64`] and advances by compare-and-swap, so any number of threads
/// can share one allocator. Global uniqueness across nodes comes from the
/// node discriminator: two allocators with distinct node IDs can never issue
/// the same ID, without talking to each other.
///
/// - Same millisecond as the last ID: the sequence increments.
/// - Sequence full: [`Poll::Pending`] for one millisecond.
/// - Newer millisecond: the sequence restarts at zero.
/// - Clock behind the last ID: `Pending` for the difference, or
///   [`AllocError::ClockDrift`] beyond the tolerated drift.
/// - Clock past what 41 bits can hold: [`AllocError::Exhausted`].
///
/// # Example
///
/// ```
/// use fanout::{AtomicIdAllocator, IdAllocator, SystemClock};
/// use std::time::Duration;
///
/// let allocator = AtomicIdAllocator::new(7, SystemClock::default());
/// let a = allocator.try_next_id(Duration::from_millis(50)).unwrap();
/// let b = allocator.try_next_id(Duration::from_millis(50)).unwrap();
/// assert!(a < b);
/// assert_eq!(a.node_id(), 7);
/// ```
pub struct AtomicIdAllocator<T>
where
    T: TimeSource,
{
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
    time: T,
    max_drift_ms: u64,
}

impl<T> AtomicIdAllocator<T>
where
    T: TimeSource,
{
    /// Creates an allocator for `node_id`. Bits beyond the node field are
    /// masked off; use [`Self::try_new`] to reject them instead.
    pub fn new(node_id: u64, time: T) -> Self {
        Self::from_components(0, node_id, 0, time)
    }

    /// Creates an allocator, rejecting a node ID that does not fit the layout.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidNodeId`] if `node_id` exceeds
    /// [`MessageId::max_node_id`].
    pub fn try_new(node_id: u64, time: T) -> Result<Self, AllocError> {
        if node_id > MessageId::max_node_id() {
            return Err(AllocError::InvalidNodeId {
                node_id,
                max: MessageId::max_node_id(),
            });
        }
        Ok(Self::new(node_id, time))
    }

    /// Creates an allocator for `node_id` that only issues IDs above `last`,
    /// typically the highest ID this node left in durable storage.
    ///
    /// `last` is ignored when another node issued it. If `last` is ahead of the
    /// clock, the allocator reports [`Poll::Pending`] until the clock catches
    /// up, or [`AllocError::ClockDrift`] when it is too far ahead.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidNodeId`] if `node_id` exceeds
    /// [`MessageId::max_node_id`].
    pub fn try_resume_after(
        node_id: u64,
        last: Option<MessageId>,
        time: T,
    ) -> Result<Self, AllocError> {
        let allocator = Self::try_new(node_id, time)?;
        Ok(match last.filter(|id| id.node_id() == node_id) {
            Some(last) => Self::from_components(
                last.timestamp(),
                node_id,
                last.sequence(),
                allocator.time,
            ),
            None => allocator,
        })
    }

    /// Creates an allocator whose last issued ID is
    /// `(timestamp, node_id, sequence)`.
    ///
    /// Fields are masked like [`Self::new`]. See [`Self::try_resume_after`]
    /// for resuming after an ID recovered from storage.
    pub fn from_components(timestamp: u64, node_id: u64, sequence: u64, time: T) -> Self {
        let initial = MessageId::from(timestamp, node_id, sequence);
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU64::new(initial.to_raw())),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU64::new(initial.to_raw()),
            time,
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
        }
    }

    /// Sets how far the clock may move backwards before allocation fails.
    pub fn with_max_drift(mut self, max_drift_ms: u64) -> Self {
        self.max_drift_ms = max_drift_ms;
        self
    }

    /// The most recently issued ID (or the initial state).
    pub fn last_id(&self) -> MessageId {
        MessageId::from_raw(self.state.load(Ordering::Acquire))
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn poll(&self) -> Result<Poll, AllocError> {
        let now = self.time.current_millis();
        if now > MessageId::max_timestamp() {
            return Err(AllocError::Exhausted {
                now_ms: now,
                max_ms: MessageId::max_timestamp(),
            });
        }

        let current_raw = self.state.load(Ordering::Acquire);
        let current_id = MessageId::from_raw(current_raw);
        let current_ts = current_id.timestamp();

        let next_id = match now.cmp(&current_ts) {
            cmp::Ordering::Equal => {
                if current_id.has_sequence_room() {
                    current_id.increment_sequence()
                } else {
                    return Ok(Poll::Pending { yield_for: 1 });
                }
            }
            cmp::Ordering::Greater => current_id.rollover_to_timestamp(now),
            cmp::Ordering::Less => return self.cold_clock_behind(now, current_ts),
        };

        if self
            .state
            .compare_exchange(
                current_raw,
                next_id.to_raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Ok(Poll::Ready { id: next_id })
        } else {
            // Another thread took this slot; retry immediately.
            Ok(Poll::Pending { yield_for: 0 })
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(&self, now: u64, current_ts: u64) -> Result<Poll, AllocError> {
        let drift_ms = current_ts - now;
        if drift_ms > self.max_drift_ms {
            #[cfg(feature = "tracing")]
            tracing::error!(drift_ms, max_drift_ms = self.max_drift_ms, "clock drift exceeded");
            return Err(AllocError::ClockDrift {
                drift_ms,
                max_drift_ms: self.max_drift_ms,
            });
        }
        #[cfg(feature = "tracing")]
        if drift_ms > 100 {
            tracing::warn!(drift_ms, "clock moved backward, waiting for it to catch up");
        }
        Ok(Poll::Pending {
            yield_for: drift_ms,
        })
    }
}

impl<T> IdAllocator for AtomicIdAllocator<T>
where
    T: TimeSource,
{
    fn node_id(&self) -> u64 {
        self.last_id().node_id()
    }

    fn try_poll_id(&self) -> Result<Poll, AllocError> {
        self.poll()
    }
}
