use core::time::Duration;

/// Abstracts how an async send waits out a pending allocator.
///
/// This keeps [`FanoutEngineAsyncExt`](crate::FanoutEngineAsyncExt) generic
/// over the runtime driving it.
pub trait SleepProvider {
    /// `Send` so the send future can move across worker threads.
    type Sleep: Future<Output = ()> + Send;

    fn sleep_for(dur: Duration) -> Self::Sleep;
}
