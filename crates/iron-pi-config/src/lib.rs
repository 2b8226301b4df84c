//! Configuration parsing for the iron-pi device client
//!
//! This crate handles parsing the KDL configuration file that controls the
//! driver socket path, reconnection backoff and send-queue behaviour.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
