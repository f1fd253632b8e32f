use core::{future::Future, time::Duration};
use std::time::Instant;

use super::SleepProvider;
use crate::{
    AllocError, FanoutEngine, IdAllocator, MessageId, MessageStore, Poll, Result, SendError,
    SendRequest, engine::check_payload,
};

/// Extension trait for sending without blocking the executor on ID
/// allocation.
///
/// While the allocator is pending, the send future sleeps through `S` for
/// the interval the allocator asks for instead of parking the thread. The
/// commit itself runs inline once an ID is issued.
pub trait FanoutEngineAsyncExt {
    /// Returns a future that resolves once the send committed or aborted.
    ///
    /// # Errors
    ///
    /// Same as [`FanoutEngine::send`]. The
    /// [`max_id_wait`](crate::EngineConfig::max_id_wait) budget applies to
    /// the time spent waiting for an ID.
    fn send_async<S>(&self, request: &SendRequest) -> impl Future<Output = Result<MessageId>>
    where
        S: SleepProvider;
}

impl<A, S> FanoutEngineAsyncExt for FanoutEngine<A, S>
where
    A: IdAllocator + Sync,
    S: MessageStore,
{
    fn send_async<P>(&self, request: &SendRequest) -> impl Future<Output = Result<MessageId>>
    where
        P: SleepProvider,
    {
        async move {
            check_payload(request)?;
            let max_wait = self.config().max_id_wait;
            let start = Instant::now();
            let message_id = loop {
                let yield_for = match self.allocator().try_poll_id()? {
                    Poll::Ready { id } => break id,
                    Poll::Pending { yield_for } => yield_for,
                };
                let waited = start.elapsed();
                if waited >= max_wait {
                    return Err(SendError::Allocation(AllocError::Stalled {
                        waited_ms: waited.as_millis() as u64,
                    }));
                }
                P::sleep_for(Duration::from_millis(yield_for).min(max_wait - waited)).await;
            };
            self.commit(request, message_id)
        }
    }
}
