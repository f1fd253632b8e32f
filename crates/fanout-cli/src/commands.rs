use std::io::{self, Write};

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use fanout::{
    AllocError, AtomicIdAllocator, EngineConfig, FanoutEngine, LogStore, MemoryStore, MessageId,
    MessageStore, MonotonicClock, SendRequest, StoreError, TableSnapshot, TimeSource, Timestamp,
    WriteBatch,
};
use serde_json::json;

use crate::config::{CliConfig, Command, SendArgs, StoreConfig};

/// The store selected on the command line.
pub enum Backend {
    Memory(MemoryStore),
    Log(LogStore),
}

impl Backend {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(match config {
            StoreConfig::Memory => Self::Memory(MemoryStore::new()),
            StoreConfig::Log { path } => Self::Log(LogStore::open(path)?),
        })
    }

    pub fn snapshot(&self) -> TableSnapshot {
        match self {
            Self::Memory(store) => store.snapshot(),
            Self::Log(store) => store.snapshot(),
        }
    }

    pub fn last_message_id(&self, node_id: u64) -> Option<MessageId> {
        match self {
            Self::Memory(store) => store.last_id_for_node(node_id),
            Self::Log(store) => store.last_message_id(node_id),
        }
    }
}

/// An allocator for `node_id` that continues after the highest ID the store
/// already holds for that node.
pub fn resume_allocator<T: TimeSource>(
    store: &Backend,
    node_id: u64,
    time: T,
) -> Result<AtomicIdAllocator<T>, AllocError> {
    let last = store.last_message_id(node_id);
    if let Some(last) = last {
        tracing::debug!(
            node_id,
            last_message_id = last.to_i64(),
            "resuming after stored message ID"
        );
    }
    AtomicIdAllocator::try_resume_after(node_id, last, time)
}

impl MessageStore for Backend {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.commit(batch),
            Self::Log(store) => store.commit(batch),
        }
    }
}

pub fn run(config: CliConfig) -> anyhow::Result<()> {
    let store = Backend::open(&config.store).context("failed to open message store")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &config.command {
        Command::Send(args) => {
            let clock = MonotonicClock::try_default()?;
            let allocator = resume_allocator(&store, config.node_id, clock)?;
            let engine = FanoutEngine::with_config(
                allocator,
                store,
                EngineConfig::default().with_max_id_wait(config.max_id_wait),
            );
            let id = send(&engine, args)?;
            writeln!(out, "{}", id.to_i64())?;
        }
        Command::Dump => write_dump(&mut out, &store.snapshot())?,
    }
    out.flush()?;
    Ok(())
}

pub fn build_request(args: &SendArgs) -> anyhow::Result<SendRequest> {
    let payload = match (&args.payload, &args.payload_file) {
        (Some(text), _) => text.clone().into_bytes(),
        (None, Some(path)) => std::fs::read(path)
            .with_context(|| format!("failed to read payload from {}", path.display()))?,
        (None, None) => Vec::new(),
    };
    let send_time = args
        .send_time
        .map_or_else(Timestamp::now, Timestamp::from_micros);

    Ok(SendRequest::new(args.sender, args.receivers.clone(), send_time)
        .expiration(args.expires_at.map(Timestamp::from_micros))
        .priority(args.priority)
        .type_id(args.type_id)
        .payload(payload)
        .cancellable(args.cancellable))
}

pub fn send<A, S>(engine: &FanoutEngine<A, S>, args: &SendArgs) -> anyhow::Result<MessageId>
where
    A: fanout::IdAllocator,
    S: MessageStore,
{
    let request = build_request(args)?;
    let id = engine.send(&request)?;
    tracing::info!(
        message_id = id.to_i64(),
        receivers = request.receiver_ids.len(),
        cancellable = request.cancellable,
        "message sent"
    );
    Ok(id)
}

/// Writes every row as one JSON object per line: queued rows first, in commit
/// order, then cancellable IDs.
pub fn write_dump<W: Write>(out: &mut W, snapshot: &TableSnapshot) -> anyhow::Result<()> {
    for row in &snapshot.queued {
        let line = json!({
            "kind": "queued",
            "receiver_id": row.receiver_id,
            "message_id": row.message_id.to_i64(),
            "sender_id": row.sender_id,
            "send_time": row.send_time.as_micros(),
            "expiration_time": row.expiration_time.as_micros(),
            "priority": row.priority,
            "type_id": row.type_id,
            "payload": STANDARD.encode(&row.payload),
            "payload_length": row.payload_length,
        });
        writeln!(out, "{line}")?;
    }
    for row in &snapshot.cancellable {
        let line = json!({
            "kind": "cancellable",
            "message_id": row.message_id.to_i64(),
        });
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout::SendError;
    use std::{path::PathBuf, time::Duration};

    struct FixedTime(u64);

    impl TimeSource for FixedTime {
        fn current_millis(&self) -> u64 {
            self.0
        }
    }

    fn args(receivers: Vec<i32>) -> SendArgs {
        SendArgs {
            sender: 7,
            receivers,
            send_time: Some(1_000),
            expires_at: None,
            priority: 1,
            type_id: 2,
            payload: Some("hi".into()),
            payload_file: None,
            cancellable: true,
        }
    }

    fn memory_engine() -> FanoutEngine<AtomicIdAllocator<MonotonicClock>, Backend> {
        FanoutEngine::new(
            AtomicIdAllocator::new(0, MonotonicClock::try_default().unwrap()),
            Backend::Memory(MemoryStore::new()),
        )
    }

    #[test]
    fn request_defaults_to_never_expiring() {
        let request = build_request(&args(vec![5, 7])).unwrap();
        assert_eq!(request.expiration_time, None);
        assert_eq!(request.send_time, Timestamp::from_micros(1_000));
        assert_eq!(&request.payload[..], b"hi");
    }

    #[test]
    fn payload_file_is_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let mut send_args = args(vec![1]);
        send_args.payload = None;
        send_args.payload_file = Some(path);
        let request = build_request(&send_args).unwrap();
        assert_eq!(&request.payload[..], [0u8, 159, 146, 150]);

        send_args.payload_file = Some(PathBuf::from("/nonexistent/payload"));
        assert!(build_request(&send_args).is_err());
    }

    #[test]
    fn dump_prints_one_line_per_row() {
        let engine = memory_engine();
        let id = send(&engine, &args(vec![3, 3, 9])).unwrap();

        let mut out = Vec::new();
        write_dump(&mut out, &engine.store().snapshot()).unwrap();
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|l| l["kind"] == "queued"
            && l["message_id"] == id.to_i64()
            && l["expiration_time"] == i64::MAX
            && l["payload"] == "aGk="));
        assert_eq!(lines[3]["kind"], "cancellable");
        assert_eq!(lines[3]["message_id"], id.to_i64());
    }

    #[test]
    fn log_backend_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Log {
            path: dir.path().join("fanout.log"),
        };

        let id = {
            let engine = FanoutEngine::new(
                AtomicIdAllocator::new(1, MonotonicClock::try_default().unwrap()),
                Backend::open(&config).unwrap(),
            );
            send(&engine, &args(vec![4])).unwrap()
        };

        let snapshot = Backend::open(&config).unwrap().snapshot();
        assert_eq!(snapshot.rows_for(id).count(), 1);
        assert!(snapshot.is_cancellable(id));
    }

    fn send_with_clock(
        config: &StoreConfig,
        millis: u64,
        max_id_wait: Duration,
    ) -> anyhow::Result<MessageId> {
        let store = Backend::open(config)?;
        let allocator = resume_allocator(&store, 0, FixedTime(millis))?;
        let engine = FanoutEngine::with_config(
            allocator,
            store,
            EngineConfig::default().with_max_id_wait(max_id_wait),
        );
        send(&engine, &args(vec![4]))
    }

    #[test]
    fn restart_on_the_same_millisecond_issues_a_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Log {
            path: dir.path().join("fanout.log"),
        };
        let wait = Duration::from_millis(100);

        let first = send_with_clock(&config, 1_000, wait).unwrap();
        let second = send_with_clock(&config, 1_000, wait).unwrap();

        assert!(second > first);
        let snapshot = Backend::open(&config).unwrap().snapshot();
        assert_eq!(snapshot.rows_for(first).count(), 1);
        assert_eq!(snapshot.rows_for(second).count(), 1);
    }

    #[test]
    fn restart_with_a_clock_behind_the_log_does_not_reuse_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Log {
            path: dir.path().join("fanout.log"),
        };

        let first = send_with_clock(&config, 1_000, Duration::from_millis(100)).unwrap();
        let err = send_with_clock(&config, 999, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SendError>(),
            Some(SendError::Allocation(AllocError::Stalled { .. }))
        ));

        let snapshot = Backend::open(&config).unwrap().snapshot();
        assert_eq!(snapshot.queued.len(), 1);
        assert_eq!(snapshot.rows_for(first).count(), 1);
    }
}
