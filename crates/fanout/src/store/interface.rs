use std::sync::Arc;

use crate::{StoreError, WriteBatch};

/// Append-only storage for queued and cancellable message rows.
///
/// The single operation is an atomic commit: after `commit` returns `Ok`,
/// every write of the batch is visible to readers; after it returns `Err`,
/// none is, and no reader ever observed a subset in between.
pub trait MessageStore: Send + Sync {
    /// Applies every write in `batch`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] describing why the batch was rejected. The
    /// store is unchanged in that case.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

impl<S: MessageStore + ?Sized> MessageStore for &S {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }
}

impl<S: MessageStore + ?Sized> MessageStore for Arc<S> {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }
}
