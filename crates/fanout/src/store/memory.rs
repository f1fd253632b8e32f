use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CancellableMessage, MessageId, MessageStore, QueuedMessage, StoreError, Write, WriteBatch,
};

/// In-memory message tables.
///
/// Both tables sit behind one [`RwLock`]. A commit checks the whole batch
/// first and only then applies it while holding the write lock, so any read
/// sees a batch entirely or not at all.
///
/// An optional row limit models the host store running out of room: a batch
/// that would cross it is rejected as a whole with
/// [`StoreError::CapacityExceeded`].
pub struct MemoryStore {
    tables: RwLock<Tables>,
    capacity: Option<usize>,
}

#[derive(Default)]
struct Tables {
    queued: Vec<QueuedMessage>,
    cancellable: Vec<CancellableMessage>,
    cancellable_ids: HashSet<MessageId>,
    // Highest committed ID per node.
    last_ids: HashMap<u64, MessageId>,
}

/// A consistent copy of both tables taken under one read lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub queued: Vec<QueuedMessage>,
    pub cancellable: Vec<CancellableMessage>,
}

impl TableSnapshot {
    pub fn rows_for(&self, message_id: MessageId) -> impl Iterator<Item = &QueuedMessage> {
        self.queued
            .iter()
            .filter(move |row| row.message_id == message_id)
    }

    pub fn is_cancellable(&self, message_id: MessageId) -> bool {
        self.cancellable
            .iter()
            .any(|row| row.message_id == message_id)
    }
}

impl Tables {
    fn rows(&self) -> usize {
        self.queued.len() + self.cancellable.len()
    }

    fn check(&self, batch: &WriteBatch, capacity: Option<usize>) -> Result<(), StoreError> {
        if let Some(limit) = capacity {
            if self.rows() + batch.len() > limit {
                return Err(StoreError::CapacityExceeded {
                    limit,
                    requested: batch.len(),
                });
            }
        }

        let mut staged = HashSet::new();
        for row in batch.cancellable() {
            if self.cancellable_ids.contains(&row.message_id) || !staged.insert(row.message_id) {
                return Err(StoreError::Conflict {
                    message_id: row.message_id,
                });
            }
        }
        Ok(())
    }

    fn observe(&mut self, message_id: MessageId) {
        let last = self
            .last_ids
            .entry(message_id.node_id())
            .or_insert(message_id);
        if message_id > *last {
            *last = message_id;
        }
    }

    fn apply(&mut self, batch: WriteBatch) {
        for write in batch {
            match write {
                Write::Queued(row) => {
                    self.observe(row.message_id);
                    self.queued.push(row);
                }
                Write::Cancellable(row) => {
                    self.observe(row.message_id);
                    self.cancellable_ids.insert(row.message_id);
                    self.cancellable.push(row);
                }
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            capacity: None,
        }
    }

    /// A store that rejects any batch taking it past `max_rows` rows in total
    /// (queued plus cancellable).
    pub fn with_capacity_limit(max_rows: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            capacity: Some(max_rows),
        }
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let tables = self.tables.read();
        TableSnapshot {
            queued: tables.queued.clone(),
            cancellable: tables.cancellable.clone(),
        }
    }

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.tables.read().queued.clone()
    }

    /// Rows addressed to `receiver_id`, in commit order.
    pub fn queued_for(&self, receiver_id: i32) -> Vec<QueuedMessage> {
        self.tables
            .read()
            .queued
            .iter()
            .filter(|row| row.receiver_id == receiver_id)
            .cloned()
            .collect()
    }

    /// Every row of one send.
    pub fn rows_for(&self, message_id: MessageId) -> Vec<QueuedMessage> {
        self.tables
            .read()
            .queued
            .iter()
            .filter(|row| row.message_id == message_id)
            .cloned()
            .collect()
    }

    pub fn is_cancellable(&self, message_id: MessageId) -> bool {
        self.tables.read().cancellable_ids.contains(&message_id)
    }

    pub fn cancellable_messages(&self) -> Vec<CancellableMessage> {
        self.tables.read().cancellable.clone()
    }

    pub fn queued_len(&self) -> usize {
        self.tables.read().queued.len()
    }

    pub fn cancellable_len(&self) -> usize {
        self.tables.read().cancellable.len()
    }

    /// The highest message ID committed by `node_id`, if it committed any row.
    ///
    /// A send with no receivers that is not cancellable writes nothing, so
    /// its ID is never observed here.
    pub fn last_id_for_node(&self, node_id: u64) -> Option<MessageId> {
        self.tables.read().last_ids.get(&node_id).copied()
    }

    /// Checks a batch against the current tables without applying it.
    ///
    /// Only meaningful when the caller serializes every mutation of this
    /// store itself, as [`LogStore`](crate::LogStore) does.
    pub(crate) fn check(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.tables.read().check(batch, self.capacity)
    }

    /// Applies a batch that has already passed [`Self::check`].
    pub(crate) fn apply(&self, batch: WriteBatch) {
        self.tables.write().apply(batch);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(writes = batch.len())))]
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Err(e) = tables.check(&batch, self.capacity) {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "memory store rejected batch");
            return Err(e);
        }
        tables.apply(batch);
        Ok(())
    }
}
