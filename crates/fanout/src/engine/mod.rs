mod config;

pub use config::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    IdAllocator, MessageId, MessageStore, QueuedMessage, Result, SendError, SendRequest,
    Timestamp, WriteBatch,
};

/// The largest payload whose length fits the 32-bit length column.
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// Executes explicit-receiver sends as single atomic commits.
///
/// Each send takes exactly one [`MessageId`] from the allocator, stages one
/// [`QueuedMessage`] per receiver plus an optional cancellable record, and
/// hands the whole batch to the store in one
/// [`commit`](MessageStore::commit). Either every row of the send becomes
/// visible or none does.
///
/// The engine holds no locks of its own; it is `Send + Sync` whenever its
/// allocator and store are and can be shared behind an `Arc`.
///
/// # Example
///
/// ```
/// use fanout::{
///     AtomicIdAllocator, FanoutEngine, MemoryStore, SendRequest, SystemClock, Timestamp,
/// };
///
/// let engine = FanoutEngine::new(
///     AtomicIdAllocator::new(1, SystemClock::default()),
///     MemoryStore::new(),
/// );
///
/// let request = SendRequest::new(10, vec![5, 7], Timestamp::now())
///     .payload(&b"hello"[..])
///     .cancellable(true);
/// let id = engine.send(&request).unwrap();
///
/// let rows = engine.store().rows_for(id);
/// assert_eq!(rows.len(), 2);
/// assert!(rows.iter().all(|row| row.expiration_time == Timestamp::MAX));
/// assert!(engine.store().is_cancellable(id));
/// ```
pub struct FanoutEngine<A, S>
where
    A: IdAllocator,
    S: MessageStore,
{
    allocator: A,
    store: S,
    config: EngineConfig,
}

impl<A, S> FanoutEngine<A, S>
where
    A: IdAllocator,
    S: MessageStore,
{
    pub fn new(allocator: A, store: S) -> Self {
        Self::with_config(allocator, store, EngineConfig::default())
    }

    pub fn with_config(allocator: A, store: S, config: EngineConfig) -> Self {
        Self {
            allocator,
            store,
            config,
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds the writes of one send without committing them.
    ///
    /// Rows follow `receiver_ids` positionally, so duplicate receivers get
    /// duplicate rows. The cancellable record, if requested, comes last.
    pub fn stage(&self, request: &SendRequest, message_id: MessageId) -> WriteBatch {
        let expiration_time = Timestamp::normalize_expiration(request.expiration_time);
        // Saturates; `send` rejects oversized payloads before staging.
        let payload_length = i32::try_from(request.payload.len()).unwrap_or(i32::MAX);

        let mut batch =
            WriteBatch::with_capacity(request.receiver_ids.len() + usize::from(request.cancellable));
        for &receiver_id in &request.receiver_ids {
            batch.push_queued(QueuedMessage {
                receiver_id,
                message_id,
                sender_id: request.sender_id,
                send_time: request.send_time,
                expiration_time,
                priority: request.priority,
                type_id: request.type_id,
                // `Bytes` clones share one buffer.
                payload: request.payload.clone(),
                payload_length,
            });
        }
        if request.cancellable {
            batch.push_cancellable(message_id);
        }
        batch
    }

    /// Sends `request` to every receiver it names, atomically.
    ///
    /// Blocks for at most [`EngineConfig::max_id_wait`] while the allocator
    /// is pending, then for as long as the store's commit takes.
    ///
    /// # Errors
    ///
    /// - [`SendError::PayloadTooLarge`] if the payload length does not fit
    ///   the length column. Nothing is allocated.
    /// - [`SendError::Allocation`] if no ID could be issued. Nothing is
    ///   staged.
    /// - [`SendError::Aborted`] if the store rejected the commit. No row of
    ///   either table was persisted and the ID is discarded.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip_all,
            fields(sender_id = request.sender_id, receivers = request.receiver_ids.len())
        )
    )]
    pub fn send(&self, request: &SendRequest) -> Result<MessageId> {
        check_payload(request)?;
        let message_id = self.allocator.try_next_id(self.config.max_id_wait)?;
        self.commit(request, message_id)
    }

    pub(crate) fn commit(&self, request: &SendRequest, message_id: MessageId) -> Result<MessageId> {
        let batch = self.stage(request, message_id);
        #[cfg(feature = "tracing")]
        let writes = batch.len();

        match self.store.commit(batch) {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%message_id, writes, "send committed");
                Ok(message_id)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%message_id, writes, error = %e, "send aborted");
                Err(SendError::Aborted(e))
            }
        }
    }
}

pub(crate) fn check_payload(request: &SendRequest) -> Result<()> {
    let len = request.payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(SendError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}
