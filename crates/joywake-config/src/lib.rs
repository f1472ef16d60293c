//! Configuration parsing for joywake
//!
//! This crate handles parsing the KDL configuration file into the
//! [`Config`] value the daemon is built from.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};
