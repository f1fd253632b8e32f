use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::MessageId;

/// Microseconds since the Unix epoch, the host store's timestamp unit.
///
/// Two values are reserved:
/// - [`Timestamp::MAX`] means "never expires".
/// - [`Timestamp::NULL`] is the store's null marker for a 64-bit column and
///   is treated exactly like an omitted expiration.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// The largest representable timestamp: "never expires".
    pub const MAX: Self = Self { micros: i64::MAX };

    /// The null-equivalent marker (`i64::MIN`).
    pub const NULL: Self = Self { micros: i64::MIN };

    pub const UNIX_EPOCH: Self = Self { micros: 0 };

    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self {
            micros: millis.saturating_mul(1_000),
        }
    }

    pub const fn as_micros(&self) -> i64 {
        self.micros
    }

    pub const fn is_null(&self) -> bool {
        self.micros == i64::MIN
    }

    pub const fn is_max(&self) -> bool {
        self.micros == i64::MAX
    }

    /// The current wall-clock time. Times before 1970 clamp to the epoch.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// The wall-clock instant, or `None` for the reserved markers and for
    /// pre-epoch values.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        if self.is_null() || self.is_max() || self.micros < 0 {
            return None;
        }
        UNIX_EPOCH.checked_add(Duration::from_micros(self.micros as u64))
    }

    /// Resolves an optional expiration to the value stored on every row.
    ///
    /// `None` and [`Timestamp::NULL`] both become [`Timestamp::MAX`]; any
    /// other value, including one in the past, is kept as-is.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout::Timestamp;
    ///
    /// assert_eq!(Timestamp::normalize_expiration(None), Timestamp::MAX);
    /// assert_eq!(Timestamp::normalize_expiration(Some(Timestamp::NULL)), Timestamp::MAX);
    /// let t = Timestamp::from_micros(5);
    /// assert_eq!(Timestamp::normalize_expiration(Some(t)), t);
    /// ```
    pub const fn normalize_expiration(expiration: Option<Self>) -> Self {
        match expiration {
            Some(t) if !t.is_null() => t,
            _ => Self::MAX,
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let micros = time
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self { micros }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else if self.is_max() {
            f.write_str("max")
        } else {
            write!(f, "{}us", self.micros)
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

/// One message waiting in one receiver's queue.
///
/// A send to N receivers produces N of these that differ only in
/// `receiver_id`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    pub receiver_id: i32,
    pub message_id: MessageId,
    pub sender_id: i32,
    pub send_time: Timestamp,
    pub expiration_time: Timestamp,
    pub priority: i16,
    pub type_id: i32,
    pub payload: Bytes,
    /// Byte length of `payload`, kept alongside it for bounds checks on the
    /// receiving side.
    pub payload_length: i32,
}

impl QueuedMessage {
    /// Returns `true` if the message is stale at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        !self.expiration_time.is_max() && self.expiration_time < now
    }
}

/// Marks a sent message as eligible for a later cancel-by-id.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CancellableMessage {
    pub message_id: MessageId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_defaults_to_max() {
        assert_eq!(Timestamp::normalize_expiration(None), Timestamp::MAX);
        assert_eq!(
            Timestamp::normalize_expiration(Some(Timestamp::NULL)),
            Timestamp::MAX
        );
    }

    #[test]
    fn past_expiration_is_kept() {
        let past = Timestamp::from_micros(-5);
        assert_eq!(Timestamp::normalize_expiration(Some(past)), past);
        assert_eq!(
            Timestamp::normalize_expiration(Some(Timestamp::UNIX_EPOCH)),
            Timestamp::UNIX_EPOCH
        );
    }

    #[test]
    fn system_time_round_trip() {
        let ts = Timestamp::from_micros(1_700_000_000_123_456);
        let time = ts.to_system_time().unwrap();
        assert_eq!(Timestamp::from(time), ts);
        assert!(Timestamp::MAX.to_system_time().is_none());
        assert!(Timestamp::NULL.to_system_time().is_none());
    }

    #[test]
    fn expiry_check_ignores_never() {
        let row = QueuedMessage {
            receiver_id: 1,
            message_id: MessageId::from(1, 0, 0),
            sender_id: 2,
            send_time: Timestamp::from_micros(10),
            expiration_time: Timestamp::MAX,
            priority: 0,
            type_id: 0,
            payload: Bytes::new(),
            payload_length: 0,
        };
        assert!(!row.is_expired_at(Timestamp::MAX));

        let stale = QueuedMessage {
            expiration_time: Timestamp::from_micros(20),
            ..row
        };
        assert!(stale.is_expired_at(Timestamp::from_micros(21)));
        assert!(!stale.is_expired_at(Timestamp::from_micros(20)));
    }
}
