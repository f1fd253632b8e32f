use core::pin::Pin;

use crate::{
    FanoutEngine, FanoutEngineAsyncExt, IdAllocator, MessageId, MessageStore, Result,
    SendRequest, SleepProvider,
};

/// Extension trait for sending through the
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// Saves naming a [`SleepProvider`] at every call site.
pub trait FanoutEngineAsyncTokioExt {
    /// Sends `request`, sleeping with [`TokioSleep`] while the allocator is
    /// pending.
    ///
    /// Internally delegates to [`FanoutEngineAsyncExt::send_async`].
    ///
    /// # Errors
    ///
    /// Same as [`FanoutEngine::send`].
    fn send_async_tokio(&self, request: &SendRequest) -> impl Future<Output = Result<MessageId>>;
}

impl<A, S> FanoutEngineAsyncTokioExt for FanoutEngine<A, S>
where
    A: IdAllocator + Sync,
    S: MessageStore,
{
    fn send_async_tokio(&self, request: &SendRequest) -> impl Future<Output = Result<MessageId>> {
        <Self as FanoutEngineAsyncExt>::send_async::<TokioSleep>(self, request)
    }
}

/// A [`SleepProvider`] backed by Tokio's timer.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    type Sleep = tokio::time::Sleep;

    fn sleep_for(dur: core::time::Duration) -> Self::Sleep {
        tokio::time::sleep(dur)
    }
}

/// A [`SleepProvider`] that yields to the scheduler instead of sleeping.
///
/// Reacts faster at low concurrency but polls the allocator in a tighter
/// loop. Under heavy contention [`TokioSleep`] usually costs less CPU.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    /// `yield_now()` returns a private future type, hence the box.
    type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn sleep_for(_dur: core::time::Duration) -> Self::Sleep {
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AllocError, AtomicIdAllocator, EngineConfig, MemoryStore, MonotonicClock, SendError,
        TimeSource, Timestamp,
    };
    use core::time::Duration;
    use futures::future::try_join_all;
    use std::collections::HashSet;
    use std::sync::Arc;

    const TASKS: usize = 8;
    // More than one millisecond's worth of sequence space, so tasks hit
    // `Pending` and have to wait.
    const SENDS_PER_TASK: usize = 1024;

    type Engine = FanoutEngine<AtomicIdAllocator<MonotonicClock>, MemoryStore>;

    fn shared_engine() -> Arc<Engine> {
        let clock = MonotonicClock::try_default().unwrap();
        Arc::new(FanoutEngine::new(
            AtomicIdAllocator::new(5, clock),
            MemoryStore::new(),
        ))
    }

    fn request(task: usize) -> SendRequest {
        let receiver = task as i32;
        SendRequest::new(1, vec![receiver, receiver + 1000], Timestamp::now())
            .payload(&b"async"[..])
            .cancellable(true)
    }

    async fn run_explicit<P: SleepProvider + 'static>(engine: Arc<Engine>) -> Vec<MessageId> {
        let tasks: Vec<tokio::task::JoinHandle<Result<Vec<MessageId>>>> = (0..TASKS)
            .map(|task| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(SENDS_PER_TASK);
                    for _ in 0..SENDS_PER_TASK {
                        ids.push(engine.send_async::<P>(&request(task)).await?);
                    }
                    Ok(ids)
                })
            })
            .collect();
        collect_ids(tasks).await
    }

    async fn collect_ids(
        tasks: Vec<tokio::task::JoinHandle<Result<Vec<MessageId>>>>,
    ) -> Vec<MessageId> {
        try_join_all(tasks)
            .await
            .unwrap()
            .into_iter()
            .flat_map(Result::unwrap)
            .collect()
    }

    fn assert_all_committed(engine: &Engine, ids: &[MessageId]) {
        assert_eq!(ids.len(), TASKS * SENDS_PER_TASK);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate message id issued");
        assert_eq!(engine.store().queued_len(), ids.len() * 2);
        assert_eq!(engine.store().cancellable_len(), ids.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_sends_with_sleep() {
        let engine = shared_engine();
        let ids = run_explicit::<TokioSleep>(Arc::clone(&engine)).await;
        assert_all_committed(&engine, &ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_sends_with_yield() {
        let engine = shared_engine();
        let ids = run_explicit::<TokioYield>(Arc::clone(&engine)).await;
        assert_all_committed(&engine, &ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_sends_with_convenience() {
        let engine = shared_engine();
        let tasks: Vec<tokio::task::JoinHandle<Result<Vec<MessageId>>>> = (0..TASKS)
            .map(|task| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(SENDS_PER_TASK);
                    for _ in 0..SENDS_PER_TASK {
                        ids.push(engine.send_async_tokio(&request(task)).await?);
                    }
                    Ok(ids)
                })
            })
            .collect();
        let ids = collect_ids(tasks).await;
        assert_all_committed(&engine, &ids);
    }

    struct FrozenTime;

    impl TimeSource for FrozenTime {
        fn current_millis(&self) -> u64 {
            10
        }
    }

    #[tokio::test]
    async fn stalled_allocator_times_out() {
        let engine = FanoutEngine::with_config(
            AtomicIdAllocator::from_components(10, 0, MessageId::max_sequence(), FrozenTime),
            MemoryStore::new(),
            EngineConfig::default().with_max_id_wait(Duration::from_millis(10)),
        );

        let err = engine.send_async_tokio(&request(0)).await.unwrap_err();

        assert!(matches!(err, SendError::Allocation(AllocError::Stalled { .. })));
        assert_eq!(engine.store().queued_len(), 0);
    }
}
