use bytes::Bytes;

use crate::Timestamp;

/// Everything a single explicit-receiver send needs.
///
/// `receiver_ids` is positional: duplicates fan out to duplicate rows and an
/// empty list is a valid send that still allocates an ID.
///
/// # Example
///
/// ```
/// use fanout::{SendRequest, Timestamp};
///
/// let request = SendRequest::new(1, vec![5, 7], Timestamp::from_micros(1_000))
///     .priority(3)
///     .type_id(42)
///     .payload(&b"hello"[..])
///     .cancellable(true);
/// assert_eq!(request.receiver_ids, [5, 7]);
/// assert!(request.expiration_time.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub sender_id: i32,
    pub receiver_ids: Vec<i32>,
    pub send_time: Timestamp,
    /// `None` is the "absent" marker: the message never expires.
    pub expiration_time: Option<Timestamp>,
    pub priority: i16,
    pub type_id: i32,
    pub payload: Bytes,
    pub cancellable: bool,
}

impl SendRequest {
    /// A non-cancellable, never-expiring request with an empty payload.
    pub fn new(sender_id: i32, receiver_ids: impl Into<Vec<i32>>, send_time: Timestamp) -> Self {
        Self {
            sender_id,
            receiver_ids: receiver_ids.into(),
            send_time,
            expiration_time: None,
            priority: 0,
            type_id: 0,
            payload: Bytes::new(),
            cancellable: false,
        }
    }

    pub fn expires_at(mut self, expiration_time: Timestamp) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }

    /// Sets the raw expiration, `None` meaning "absent".
    pub fn expiration(mut self, expiration_time: Option<Timestamp>) -> Self {
        self.expiration_time = expiration_time;
        self
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn type_id(mut self, type_id: i32) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }
}
