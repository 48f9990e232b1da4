//! Shared wire types and constants for logd.
//!
//! This crate defines the application command carried inside every signed
//! envelope, the log record relayed to tailers and stored by the daemon, and
//! the reserved tokens and keys the protocol gives special meaning to.
//!
//! All messages use the protobuf wire format (via `prost`). Field tags are
//! fixed and must never be renumbered: producers, tailers and the daemon may
//! be upgraded independently.
//!
//! # Reserved values
//!
//! | Value | Meaning |
//! |-------|---------|
//! | [`TAIL_TOKEN`] | Raw payload that subscribes the sender to live records |
//! | [`PING_TOKEN`] | Raw payload that keeps a subscription alive |
//! | [`REPLY_KEY`] | Key of every record the daemon itself originates |
//! | [`END_OF_STREAM`] | Text of the record that terminates a query reply |
//! | [`STATUS_TOKEN`] | Payload of the bearer token for the HTTP status route |
//! | [`KICKED_NOTICE`] | Start of the notice sent to an evicted subscriber |

mod command;
mod record;

pub use command::{CodecError, Command, Name, QueryParams};
pub use record::{partition_key, timestamp_nanos, Level, LogRecord};

/// Payload of a subscription request. Signed with the read secret.
pub const TAIL_TOKEN: &[u8] = b"tail";

/// Payload of a subscription heartbeat. Signed with the read secret.
pub const PING_TOKEN: &[u8] = b"ping";

/// Payload signed with the read secret to authorize `GET /status`.
pub const STATUS_TOKEN: &[u8] = b"status";

/// Key used by records the daemon sends on its own behalf (notices, sentinel).
pub const REPLY_KEY: &str = "//logd";

/// Text of the sentinel record that ends a streamed query reply.
pub const END_OF_STREAM: &str = "\u{4}end";

/// Leading text of the notice a subscriber receives when it is evicted.
pub const KICKED_NOTICE: &str = "you've been kicked";

/// Largest datagram the daemon sends or expects to receive.
pub const MAX_PACKET_SIZE: usize = 2048;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn write_command_carries_record() {
        let record = LogRecord::new("/prod/api/handler", Level::Info, "started");
        let bytes = Command::write(record.clone()).encode_to_vec();

        let decoded = Command::decode_checked(&bytes).expect("should decode");
        assert_eq!(decoded.name(), Name::Write);
        assert_eq!(decoded.msg, Some(record));
        assert!(decoded.query_params.is_none());
    }

    #[test]
    fn write_without_record_is_rejected() {
        let bytes = Command {
            name: Name::Write as i32,
            msg: None,
            query_params: None,
        }
        .encode_to_vec();

        assert!(matches!(
            Command::decode_checked(&bytes),
            Err(CodecError::MissingRecord)
        ));
    }

    #[test]
    fn query_without_params_is_unconstrained() {
        let bytes = Command {
            name: Name::Query as i32,
            msg: None,
            query_params: None,
        }
        .encode_to_vec();

        let decoded = Command::decode_checked(&bytes).expect("should decode");
        assert_eq!(decoded.name(), Name::Query);
        assert_eq!(decoded.params(), QueryParams::default());
    }

    #[test]
    fn unknown_name_is_rejected() {
        let bytes = Command {
            name: 42,
            msg: None,
            query_params: None,
        }
        .encode_to_vec();

        assert!(matches!(
            Command::decode_checked(&bytes),
            Err(CodecError::UnknownName(42))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Command::decode_checked(&[0xff, 0xff, 0xff]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn control_tokens_do_not_decode_as_commands() {
        // "tail" and "ping" must never be mistaken for a valid WRITE.
        for token in [TAIL_TOKEN, PING_TOKEN] {
            let decoded = Command::decode_checked(token);
            assert!(!matches!(decoded, Ok(ref c) if c.name() == Name::Write));
        }
    }

    #[test]
    fn query_params_keep_optional_fields() {
        let params = QueryParams {
            limit: Some(10),
            level: Some(Level::Error as i32),
            key_prefix: Some("/prod".to_string()),
            ..Default::default()
        };
        let bytes = Command::query(params.clone()).encode_to_vec();
        let decoded = Command::decode_checked(&bytes).expect("should decode");
        assert_eq!(decoded.params(), params);
        assert_eq!(decoded.params().offset, None);
    }

    #[test]
    fn sentinel_is_recognised() {
        assert!(LogRecord::end_of_stream().is_end_of_stream());
        assert!(!LogRecord::notice("hello").is_end_of_stream());
        assert!(!LogRecord::new(REPLY_KEY, Level::Info, "other").is_end_of_stream());
    }

    #[test]
    fn kick_notice_is_recognised() {
        let kicked = LogRecord::kicked("ping timed out");
        assert_eq!(kicked.text, "you've been kicked, ping timed out");
        assert!(kicked.is_kick_notice());

        assert!(!LogRecord::notice("tailer 127.0.0.1:9 kicked").is_kick_notice());
        // Only the daemon's own key counts.
        assert!(!LogRecord::new("/a/b/c", Level::Info, kicked.text).is_kick_notice());
    }
}
