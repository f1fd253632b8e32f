//! Error types for allocation, storage, and the send path.
//!
//! The send path has exactly one outcome a caller must treat as "nothing
//! happened": [`SendError`]. It wraps either an [`AllocError`] (no identifier
//! could be issued, the store was never touched) or a [`StoreError`] (the
//! commit aborted and no row of any kind was persisted).

use crate::MessageId;

/// A result type that defaults to [`SendError`].
pub type Result<T, E = SendError> = core::result::Result<T, E>;

/// Reasons an [`IdAllocator`](crate::IdAllocator) could not issue an
/// identifier.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AllocError {
    /// The clock is past the largest timestamp the ID layout can encode.
    ///
    /// Issuing further IDs would wrap the timestamp field and collide with
    /// IDs already handed out, so this is permanent for the configured epoch.
    #[error("timestamp space exhausted: {now_ms}ms exceeds the {max_ms}ms the ID layout can encode")]
    Exhausted { now_ms: u64, max_ms: u64 },

    /// The time source went backwards by more than the tolerated drift.
    #[error("clock moved backward by {drift_ms}ms (more than {max_drift_ms}ms tolerated)")]
    ClockDrift { drift_ms: u64, max_drift_ms: u64 },

    /// A blocking acquisition used its whole wait budget without an ID.
    #[error("no message ID issued after waiting {waited_ms}ms")]
    Stalled { waited_ms: u64 },

    /// The node discriminator does not fit in the ID layout.
    #[error("node ID {node_id} is out of range (max = {max})")]
    InvalidNodeId { node_id: u64, max: u64 },
}

/// A [`MonotonicClock`](crate::MonotonicClock) could not be started.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("clock unavailable: {reason}")]
pub struct ClockError {
    pub reason: String,
}

/// Reasons a [`MessageStore`](crate::MessageStore) aborted a commit.
///
/// Every variant means the whole batch was rejected.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A cancellable record for this message already exists.
    #[error("message {message_id} is already registered as cancellable")]
    Conflict { message_id: MessageId },

    /// Applying the batch would exceed the store's row capacity.
    #[error("row capacity exceeded: {requested} rows requested, limit is {limit}")]
    CapacityExceeded { limit: usize, requested: usize },

    /// The durable backend failed to read or write.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A committed record could not be decoded during recovery.
    #[error("corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// A deliberately injected fault, used to exercise abort paths.
    #[error("injected fault: {reason}")]
    Injected { reason: String },
}

/// What a caller of [`FanoutEngine::send`](crate::FanoutEngine::send) sees
/// when a send does not complete.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SendError {
    /// The transaction aborted; nothing was persisted.
    #[error("send aborted: {0}")]
    Aborted(#[from] StoreError),

    /// No message ID could be allocated; nothing was staged.
    #[error("message ID allocation failed: {0}")]
    Allocation(#[from] AllocError),

    /// The payload length does not fit the 32-bit length column.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

impl SendError {
    /// Returns `true` if the failure happened at commit time.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
