//! Durable append-only log backend.
//!
//! Every committed batch is one line of JSON. A line is written with a single
//! `write_all` and synced before the batch becomes visible in memory, so
//! after a crash the log holds some prefix of the committed batches followed
//! by, at most, one torn line. Recovery drops that line.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write as _},
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CancellableMessage, MemoryStore, MessageId, MessageStore, QueuedMessage, StoreError,
    TableSnapshot, Timestamp, Write, WriteBatch,
};

/// A [`MessageStore`] that persists batches to a log file and serves reads
/// from an in-memory replica rebuilt on open.
pub struct LogStore {
    path: PathBuf,
    file: Mutex<LogFile>,
    view: MemoryStore,
}

struct LogFile {
    file: File,
    len: u64,
    // Set when a failed append could not be rolled back. The file may end
    // in a partial record, so nothing more is appended.
    broken: bool,
}

#[derive(Serialize, Deserialize)]
struct Frame {
    writes: Vec<FrameWrite>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FrameWrite {
    Queued {
        receiver_id: i32,
        message_id: MessageId,
        sender_id: i32,
        send_time: Timestamp,
        expiration_time: Timestamp,
        priority: i16,
        type_id: i32,
        payload: String,
        payload_length: i32,
    },
    Cancellable {
        message_id: MessageId,
    },
}

impl From<&Write> for FrameWrite {
    fn from(write: &Write) -> Self {
        match write {
            Write::Queued(row) => Self::Queued {
                receiver_id: row.receiver_id,
                message_id: row.message_id,
                sender_id: row.sender_id,
                send_time: row.send_time,
                expiration_time: row.expiration_time,
                priority: row.priority,
                type_id: row.type_id,
                payload: STANDARD.encode(&row.payload),
                payload_length: row.payload_length,
            },
            Write::Cancellable(row) => Self::Cancellable {
                message_id: row.message_id,
            },
        }
    }
}

impl FrameWrite {
    fn into_write(self) -> Result<Write, String> {
        Ok(match self {
            Self::Queued {
                receiver_id,
                message_id,
                sender_id,
                send_time,
                expiration_time,
                priority,
                type_id,
                payload,
                payload_length,
            } => {
                let payload = STANDARD
                    .decode(payload)
                    .map_err(|e| format!("payload is not base64: {e}"))?;
                Write::Queued(QueuedMessage {
                    receiver_id,
                    message_id,
                    sender_id,
                    send_time,
                    expiration_time,
                    priority,
                    type_id,
                    payload: Bytes::from(payload),
                    payload_length,
                })
            }
            Self::Cancellable { message_id } => {
                Write::Cancellable(CancellableMessage { message_id })
            }
        })
    }
}

fn encode(batch: &WriteBatch) -> Result<Vec<u8>, StoreError> {
    let frame = Frame {
        writes: batch.iter().map(FrameWrite::from).collect(),
    };
    let mut line = serde_json::to_vec(&frame).map_err(std::io::Error::from)?;
    line.push(b'\n');
    Ok(line)
}

fn decode(line: &[u8]) -> Result<WriteBatch, String> {
    let frame: Frame = serde_json::from_slice(line).map_err(|e| e.to_string())?;
    frame
        .writes
        .into_iter()
        .map(FrameWrite::into_write)
        .collect()
}

impl LogStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// A torn final line is discarded and truncated from the file.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the file cannot be opened, read, or truncated.
    /// - [`StoreError::Corrupt`] if a line other than the last one cannot be
    ///   decoded or replayed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(path = %path.as_ref().display())))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let view = MemoryStore::new();
        let mut valid_len = 0usize;
        let mut batches = 0usize;
        let total_lines = contents.split(|b| *b == b'\n').count();

        for (index, line) in contents.split(|b| *b == b'\n').enumerate() {
            let is_last = index + 1 == total_lines;
            // `split` yields the bytes after the final newline last: empty
            // for a clean log, a torn write otherwise.
            if is_last {
                #[cfg(feature = "tracing")]
                if !line.is_empty() {
                    tracing::warn!(bytes = line.len(), "dropping torn tail of message log");
                }
                break;
            }
            let batch = match decode(line) {
                Ok(batch) => batch,
                Err(_) if index + 2 == total_lines && contents.ends_with(b"\n") => {
                    // The last complete line is unreadable: treat as torn.
                    #[cfg(feature = "tracing")]
                    tracing::warn!(line = index + 1, "dropping undecodable final record");
                    break;
                }
                Err(reason) => {
                    return Err(StoreError::Corrupt {
                        line: index + 1,
                        reason,
                    });
                }
            };
            view.commit(batch).map_err(|e| StoreError::Corrupt {
                line: index + 1,
                reason: e.to_string(),
            })?;
            valid_len += line.len() + 1;
            batches += 1;
        }

        if valid_len < contents.len() {
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(batches, bytes = valid_len, "replayed message log");
        #[cfg(not(feature = "tracing"))]
        let _ = batches;

        Ok(Self {
            path,
            file: Mutex::new(LogFile {
                file,
                len: valid_len as u64,
                broken: false,
            }),
            view,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory replica of everything committed so far.
    pub fn view(&self) -> &MemoryStore {
        &self.view
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.view.snapshot()
    }

    /// The highest message ID in the log that was issued by `node_id`.
    ///
    /// An allocator for the same node should resume strictly after it.
    pub fn last_message_id(&self, node_id: u64) -> Option<MessageId> {
        self.view.last_id_for_node(node_id)
    }
}

impl MessageStore for LogStore {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(writes = batch.len())))]
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut log = self.file.lock();
        if log.broken {
            return Err(StoreError::Io(io::Error::other(
                "message log is poisoned by a failed rollback",
            )));
        }
        // The file lock serializes every mutation of `view`, so the check
        // still holds when the batch is applied below.
        self.view.check(&batch)?;
        let line = encode(&batch)?;

        let appended = log
            .file
            .write_all(&line)
            .and_then(|()| log.file.sync_data());
        if let Err(e) = appended {
            // Cut any partial record so the next append starts on a clean
            // line boundary.
            let len = log.len;
            if let Err(rollback) = log.file.set_len(len) {
                log.broken = true;
                #[cfg(feature = "tracing")]
                tracing::error!(error = %rollback, "message log rollback failed");
                #[cfg(not(feature = "tracing"))]
                let _ = rollback;
            }
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "message log append failed");
            return Err(StoreError::Io(e));
        }
        log.len += line.len() as u64;

        self.view.apply(batch);
        Ok(())
    }
}
