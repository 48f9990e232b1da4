//! logd daemon library logic.
//!
//! The daemon accepts signed UDP datagrams carrying log writes, relays each
//! accepted write to live tailers and answers historical queries from the
//! store. A small HTTP surface reports liveness and counters.

pub mod background;
pub mod config;
pub mod error;
pub mod guard;
pub mod middleware;
mod query;
pub mod registry;
pub mod stats;
pub mod status;
pub mod transport;

pub use config::{load_config, Config, ConfigError};
pub use error::TransportError;
pub use guard::{DedupFilter, WriteGuard};
pub use registry::{Registration, SubscriberRegistry};
pub use stats::{DropReason, Stats, StatsSnapshot};
pub use status::StatusState;
pub use transport::{Transport, TransportSettings};
