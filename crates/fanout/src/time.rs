use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::ClockError;

/// Default allocator epoch: Wednesday, January 1, 2025 00:00:00 UTC
pub const CUSTOM_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// Standard UNIX epoch: Thursday, January 1, 1970 00:00:00 UTC
pub const UNIX_EPOCH_ORIGIN: Duration = Duration::from_millis(0);

/// A source of milliseconds relative to an allocator epoch.
///
/// This abstraction lets the allocator run on a real monotonic clock in
/// production and on a fixed or stepping clock in tests.
///
/// # Example
///
/// ```
/// use fanout::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the configured epoch.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// Shared ticker thread that updates every millisecond.
struct SharedTickerInner {
    current: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A monotonic time source aligned to a fixed epoch.
///
/// At construction the clock records the wall-clock offset from `epoch`, then
/// a background thread advances an atomic tick once per millisecond using
/// [`Instant`]. Reads are a single atomic load and never go backwards, even if
/// the system clock is adjusted.
///
/// The ticker thread exits once the last clone of the clock is dropped.
#[derive(Clone)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    epoch_offset: u64, // in milliseconds
}

impl MonotonicClock {
    /// Starts a clock using [`CUSTOM_EPOCH`] as t = 0.
    ///
    /// # Errors
    ///
    /// See [`Self::try_with_epoch`].
    pub fn try_default() -> Result<Self, ClockError> {
        Self::try_with_epoch(CUSTOM_EPOCH)
    }

    /// Starts a clock whose t = 0 is `epoch` (a duration since 1970-01-01 UTC).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError`] if the system time is earlier
    /// than `epoch` or the ticker thread cannot be spawned.
    pub fn try_with_epoch(epoch: Duration) -> Result<Self, ClockError> {
        let system_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ClockError {
                reason: "system clock is before the UNIX epoch".into(),
            })?;
        let offset = system_now
            .checked_sub(epoch)
            .ok_or_else(|| ClockError {
                reason: format!(
                    "system clock is before the allocator epoch ({}ms)",
                    epoch.as_millis()
                ),
            })?
            .as_millis() as u64;

        let inner = Arc::new(SharedTickerInner {
            current: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("fanout-clock".into())
            .spawn(move || {
                let start = Instant::now();
                let mut tick = 0;

                loop {
                    let Some(inner_ref) = weak_inner.upgrade() else {
                        break;
                    };

                    let target = start + Duration::from_millis(tick);
                    let now = Instant::now();
                    if now < target {
                        thread::sleep(target - now);
                    }

                    let now_ms = start.elapsed().as_millis() as u64;
                    inner_ref.current.store(now_ms, Ordering::Release);

                    // Align to the next tick after the actual time
                    tick = now_ms + 1;
                }
            })
            .map_err(|e| ClockError {
                reason: format!("failed to spawn ticker thread: {e}"),
            })?;

        // Freshly created, so the cell is always empty here.
        let _ = inner._handle.set(handle);

        Ok(Self {
            inner,
            epoch_offset: offset,
        })
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.epoch_offset + self.inner.current.load(Ordering::Acquire)
    }
}

/// A time source that reads the wall clock on every call.
///
/// Cheaper to set up than [`MonotonicClock`] for short-lived processes, but
/// follows any adjustment of the system clock (including backwards jumps,
/// which the allocator reports as `Pending` or [`AllocError::ClockDrift`](crate::AllocError::ClockDrift)).
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    epoch_ms: u64,
}

impl SystemClock {
    pub const fn with_epoch(epoch: Duration) -> Self {
        Self {
            epoch_ms: epoch.as_millis() as u64,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::with_epoch(CUSTOM_EPOCH)
    }
}

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_millis() as u64).saturating_sub(self.epoch_ms))
            .unwrap_or(0)
    }
}
