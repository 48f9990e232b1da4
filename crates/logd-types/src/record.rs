//! Log records and severity levels.

use std::time::SystemTime;

use prost_types::Timestamp;

use crate::{END_OF_STREAM, KICKED_NOTICE, REPLY_KEY};

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Level {
    Unknown = 0,
    Trace = 1,
    Debug = 2,
    Info = 3,
    Warn = 4,
    Error = 5,
    Fatal = 6,
}

impl Level {
    /// Returns the upper-case label for this level.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// A single structured log record.
///
/// `key` is a `/`-delimited path such as `/prod/api/handler`. The first two
/// segments after the leading slash select the storage partition.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogRecord {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<Timestamp>,
    #[prost(enumeration = "Level", tag = "6")]
    pub level: i32,
    #[prost(string, tag = "7")]
    pub text: String,
    #[prost(string, tag = "12")]
    pub key: String,
}

impl LogRecord {
    /// Creates a record stamped with the current wall-clock time.
    pub fn new(key: impl Into<String>, level: Level, text: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Timestamp::from(SystemTime::now())),
            level: level as i32,
            text: text.into(),
            key: key.into(),
        }
    }

    /// A record the daemon originates itself, such as a join or kick notice.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(REPLY_KEY, Level::Info, text)
    }

    /// The notice sent to a subscriber the daemon has evicted.
    pub fn kicked(reason: &str) -> Self {
        Self::notice(format!("{KICKED_NOTICE}, {reason}"))
    }

    /// The sentinel that terminates a streamed query reply.
    pub fn end_of_stream() -> Self {
        Self::new(REPLY_KEY, Level::Unknown, END_OF_STREAM)
    }

    /// Returns `true` if this record is the query sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        self.key == REPLY_KEY && self.text == END_OF_STREAM
    }

    pub fn is_kick_notice(&self) -> bool {
        self.key == REPLY_KEY && self.text.starts_with(KICKED_NOTICE)
    }

    /// Record timestamp as Unix nanoseconds, or `0` when unset.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.as_ref().map(timestamp_nanos).unwrap_or(0)
    }
}

/// Converts a protobuf timestamp to Unix nanoseconds, saturating on overflow.
pub fn timestamp_nanos(ts: &Timestamp) -> i64 {
    ts.seconds
        .saturating_mul(1_000_000_000)
        .saturating_add(i64::from(ts.nanos))
}

/// Derives the storage partition (`/seg1/seg2`) from a record key.
///
/// Returns `None` when the key has fewer than three `/`-separated segments.
pub fn partition_key(key: &str) -> Option<String> {
    let mut segments = key.split('/');
    let _root = segments.next()?;
    let first = segments.next()?;
    let second = segments.next()?;
    Some(format!("/{first}/{second}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_uses_second_and_third_segment() {
        assert_eq!(
            partition_key("/prod/api/handler/x").as_deref(),
            Some("/prod/api")
        );
        assert_eq!(partition_key("/prod/api").as_deref(), Some("/prod/api"));
    }

    #[test]
    fn partition_key_rejects_short_keys() {
        assert_eq!(partition_key("/prod"), None);
        assert_eq!(partition_key("prod"), None);
        assert_eq!(partition_key(""), None);
    }

    #[test]
    fn timestamp_nanos_combines_fields() {
        let ts = Timestamp {
            seconds: 2,
            nanos: 5,
        };
        assert_eq!(timestamp_nanos(&ts), 2_000_000_005);
        assert_eq!(LogRecord::default().timestamp_nanos(), 0);
    }

    #[test]
    fn level_labels() {
        assert_eq!(Level::Warn.label(), "WARN");
        assert_eq!(Level::try_from(6), Ok(Level::Fatal));
        assert!(Level::try_from(7).is_err());
    }
}
