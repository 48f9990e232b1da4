//! The application command carried inside a signed envelope.

use prost::Message;
use prost_types::Timestamp;
use thiserror::Error;

use crate::record::LogRecord;

/// Command discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Name {
    Write = 0,
    Tail = 1,
    Ping = 2,
    Query = 3,
}

/// Filter for a historical query. Every field is optional; an absent field
/// leaves that dimension unconstrained.
#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryParams {
    #[prost(uint32, optional, tag = "1")]
    pub offset: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub limit: Option<u32>,
    #[prost(message, optional, tag = "3")]
    pub time_start: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub time_end: Option<Timestamp>,
    #[prost(enumeration = "crate::Level", optional, tag = "8")]
    pub level: Option<i32>,
    #[prost(string, optional, tag = "13")]
    pub key_prefix: Option<String>,
}

/// A decoded application command.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Command {
    #[prost(enumeration = "Name", tag = "1")]
    pub name: i32,
    #[prost(message, optional, tag = "2")]
    pub msg: Option<LogRecord>,
    #[prost(message, optional, tag = "3")]
    pub query_params: Option<QueryParams>,
}

/// Errors produced while decoding a command payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not a valid protobuf `Command`.
    #[error("malformed command: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The command name is outside the known set.
    #[error("unknown command name: {0}")]
    UnknownName(i32),

    /// A WRITE arrived without a record.
    #[error("write command carries no record")]
    MissingRecord,
}

impl Command {
    /// Builds a WRITE command for `record`.
    pub fn write(record: LogRecord) -> Self {
        Self {
            name: Name::Write as i32,
            msg: Some(record),
            query_params: None,
        }
    }

    /// Builds a QUERY command for `params`.
    pub fn query(params: QueryParams) -> Self {
        Self {
            name: Name::Query as i32,
            msg: None,
            query_params: Some(params),
        }
    }

    /// Decodes a command and checks that its payload matches its name.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the bytes do not decode, the name is unknown,
    /// or a WRITE carries no record.
    pub fn decode_checked(bytes: &[u8]) -> Result<Self, CodecError> {
        let command = Self::decode(bytes)?;
        let name = Name::try_from(command.name).map_err(|_| CodecError::UnknownName(command.name))?;
        if name == Name::Write && command.msg.is_none() {
            return Err(CodecError::MissingRecord);
        }
        Ok(command)
    }

    /// Query parameters, or an unconstrained filter if none were sent.
    pub fn params(&self) -> QueryParams {
        self.query_params.clone().unwrap_or_default()
    }
}
