//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Load the configuration file if it exists, otherwise fall back to defaults.
///
/// The daemon is usable without any configuration file, so a missing file is
/// not an error. A file that exists but does not parse still is.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::debug!(
            "No configuration file at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    parse_config(path)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl carries an older miette, rebuild the span by hand
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "log-level" => {
                let val = string_value(node)?;
                config.log_level = val
                    .parse()
                    .map_err(|message| ConfigError::Invalid { message })?;
            }
            "cooldown" => {
                config.cooldown = parse_cooldown(node)?;
            }
            "command" => {
                let val = string_value(node)?;
                if val.trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        message: "`command` must not be empty".to_string(),
                    });
                }
                config.command = Some(val.to_string());
            }
            "inhibit" => {
                config.inhibit = match node.entries().first() {
                    // A bare `inhibit` node switches it on
                    None => true,
                    Some(entry) => entry.value().as_bool().ok_or_else(|| ConfigError::Invalid {
                        message: "`inhibit` expects true or false".to_string(),
                    })?,
                };
            }
            "disable" => {
                for entry in node.entries() {
                    let name = entry.value().as_string().ok_or_else(|| ConfigError::Invalid {
                        message: "`disable` expects waker names as strings".to_string(),
                    })?;
                    config.disabled_wakers.push(name.to_string());
                }
            }
            name => {
                tracing::warn!("Unknown configuration node: {}", name);
            }
        }
    }

    Ok(config)
}

fn string_value(node: &kdl::KdlNode) -> Result<&str, ConfigError> {
    let entry = node.entries().first().ok_or_else(|| ConfigError::MissingValue {
        node: node.name().value().to_string(),
    })?;
    entry.value().as_string().ok_or_else(|| ConfigError::Invalid {
        message: format!("`{}` expects a string", node.name().value()),
    })
}

fn parse_cooldown(node: &kdl::KdlNode) -> Result<u64, ConfigError> {
    let entry = node.entries().first().ok_or_else(|| ConfigError::MissingValue {
        node: "cooldown".to_string(),
    })?;
    match entry.value().as_i64() {
        Some(secs) if secs > 0 => Ok(secs as u64),
        Some(secs) => Err(ConfigError::Invalid {
            message: format!("`cooldown` must be a positive number of seconds, got {}", secs),
        }),
        None => Err(ConfigError::Invalid {
            message: "`cooldown` expects an integer number of seconds".to_string(),
        }),
    }
}
