use core::fmt;

/// A 64-bit message identifier shared by every row of one send.
///
/// - 1 bit reserved (always zero so the ID is a non-negative `i64`)
/// - 41 bits timestamp (ms since the allocator epoch)
/// - 10 bits node ID (partition/node discriminator)
/// - 12 bits sequence
///
/// ```text
///  Bit Index:  63           63 62            22 21             12 11             0
///              +--------------+----------------+-----------------+---------------+
///  Field:      | reserved (1) | timestamp (41) |   node ID (10)  | sequence (12) |
///              +--------------+----------------+-----------------+---------------+
///              |<----------- MSB ---------- 64 bits ----------- LSB ------------>|
/// ```
///
/// Ordering follows the raw value, so IDs sort by timestamp first, then node,
/// then sequence.
///
/// # Example
///
/// ```
/// use fanout::MessageId;
///
/// let id = MessageId::from(1000, 2, 1);
/// assert_eq!(id.timestamp(), 1000);
/// assert_eq!(id.node_id(), 2);
/// assert_eq!(id.sequence(), 1);
/// assert!(id.to_i64() >= 0);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    id: u64,
}

impl MessageId {
    /// Bitmask for the 41-bit timestamp field. Occupies bits 22 through 62.
    pub const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

    /// Bitmask for the 10-bit node ID field. Occupies bits 12 through 21.
    pub const NODE_ID_MASK: u64 = (1 << 10) - 1;

    /// Bitmask for the 12-bit sequence field. Occupies bits 0 through 11.
    pub const SEQUENCE_MASK: u64 = (1 << 12) - 1;

    pub const TIMESTAMP_SHIFT: u64 = 22;
    pub const NODE_ID_SHIFT: u64 = 12;
    pub const SEQUENCE_SHIFT: u64 = 0;

    /// Packs the three fields. Out-of-range values are masked.
    pub const fn from(timestamp: u64, node_id: u64, sequence: u64) -> Self {
        let timestamp = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let node_id = (node_id & Self::NODE_ID_MASK) << Self::NODE_ID_SHIFT;
        let sequence = (sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self {
            id: timestamp | node_id | sequence,
        }
    }

    /// Extracts the timestamp (ms since the allocator epoch).
    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    /// Extracts the node discriminator.
    pub const fn node_id(&self) -> u64 {
        (self.id >> Self::NODE_ID_SHIFT) & Self::NODE_ID_MASK
    }

    /// Extracts the per-millisecond sequence.
    pub const fn sequence(&self) -> u64 {
        (self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    pub const fn max_timestamp() -> u64 {
        Self::TIMESTAMP_MASK
    }

    pub const fn max_node_id() -> u64 {
        Self::NODE_ID_MASK
    }

    pub const fn max_sequence() -> u64 {
        Self::SEQUENCE_MASK
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Reinterprets a raw value. The reserved bit is cleared.
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            id: raw & (u64::MAX >> 1),
        }
    }

    /// The ID as the signed 64-bit integer the send contract returns.
    ///
    /// Never negative: the reserved bit is always zero.
    pub const fn to_i64(&self) -> i64 {
        self.id as i64
    }

    /// Returns `None` for negative input.
    pub const fn from_i64(value: i64) -> Option<Self> {
        if value < 0 {
            None
        } else {
            Some(Self { id: value as u64 })
        }
    }

    /// Returns `true` if the sequence can be incremented within this tick.
    pub const fn has_sequence_room(&self) -> bool {
        self.sequence() < Self::max_sequence()
    }

    /// Same timestamp and node, sequence + 1.
    pub const fn increment_sequence(&self) -> Self {
        Self::from(self.timestamp(), self.node_id(), self.sequence() + 1)
    }

    /// A newer timestamp on the same node, sequence reset to zero.
    pub const fn rollover_to_timestamp(&self, timestamp: u64) -> Self {
        Self::from(timestamp, self.node_id(), 0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageId")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp())
            .field("node_id", &self.node_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl From<MessageId> for i64 {
    fn from(id: MessageId) -> Self {
        id.to_i64()
    }
}
