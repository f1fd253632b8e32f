use crate::{CancellableMessage, MessageId, QueuedMessage};

/// A single staged row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Queued(QueuedMessage),
    Cancellable(CancellableMessage),
}

/// The writes of one unit of work, in staging order.
///
/// A batch is inert until handed to
/// [`MessageStore::commit`](crate::MessageStore::commit), which applies all
/// of it or none of it. Dropping a batch discards it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writes: Vec::with_capacity(capacity),
        }
    }

    pub fn push_queued(&mut self, row: QueuedMessage) {
        self.writes.push(Write::Queued(row));
    }

    pub fn push_cancellable(&mut self, message_id: MessageId) {
        self.writes
            .push(Write::Cancellable(CancellableMessage { message_id }));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Write> {
        self.writes.iter()
    }

    pub fn queued(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.writes.iter().filter_map(|w| match w {
            Write::Queued(row) => Some(row),
            Write::Cancellable(_) => None,
        })
    }

    pub fn cancellable(&self) -> impl Iterator<Item = &CancellableMessage> {
        self.writes.iter().filter_map(|w| match w {
            Write::Cancellable(row) => Some(row),
            Write::Queued(_) => None,
        })
    }
}

impl IntoIterator for WriteBatch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a Write;
    type IntoIter = core::slice::Iter<'a, Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.iter()
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Write>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}
