//! Snowflake identity tokens.
//!
//! Layout (64 bits, most significant first):
//! ```text
//! ┌──────────────────────┬──────────┬──────────┬───────────┐
//! │ unix seconds         │ worker   │ process  │ counter   │
//! │ 42 bits              │ 5 bits   │ 5 bits   │ 12 bits   │
//! └──────────────────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! Because the timestamp occupies the high bits, plain integer comparison
//! doubles as creation-time ordering.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const TIMESTAMP_SHIFT: u32 = 22;
const WORKER_SHIFT: u32 = 17;
const PROCESS_SHIFT: u32 = 12;
const FIELD_MASK: u64 = 0x1f;
const COUNTER_MASK: u64 = 0xfff;

/// Opaque, totally ordered record identity.
///
/// Rendered as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Seconds since the unix epoch at which this token was issued.
    pub const fn timestamp(self) -> u64 {
        self.0 >> TIMESTAMP_SHIFT
    }

    /// Big-endian bytes, so byte order matches token order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Issues strictly increasing snowflakes for one process.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    worker_id: u64,
    process_id: u64,
    counter: u64,
    last: u64,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u64) -> Self {
        Self::with_process(worker_id, u64::from(std::process::id()))
    }

    pub fn with_process(worker_id: u64, process_id: u64) -> Self {
        Self {
            worker_id: worker_id & FIELD_MASK,
            process_id: process_id & FIELD_MASK,
            counter: 0,
            last: 0,
        }
    }

    /// Issue the next token.
    pub fn next(&mut self) -> Snowflake {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.next_at(secs)
    }

    /// Issue a token for an explicit clock reading.
    pub fn next_at(&mut self, unix_secs: u64) -> Snowflake {
        self.counter = (self.counter + 1) & COUNTER_MASK;
        let candidate = (unix_secs << TIMESTAMP_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | (self.process_id << PROCESS_SHIFT)
            | self.counter;
        // Counter wrap within one second or a clock step backwards.
        self.last = if candidate > self.last { candidate } else { self.last + 1 };
        Snowflake(self.last)
    }

    /// Never issue `seen` or anything below it. Called with recovered ids.
    pub fn observe(&mut self, seen: Snowflake) {
        self.last = self.last.max(seen.0);
    }
}
