//! Error types for waker construction and bus sessions

use std::time::Duration;

use thiserror::Error;

/// Errors building a waker from its description
#[derive(Debug, Error)]
pub enum WakerError {
    #[error("waker `{name}` needs either an argument list or a shell line, not both or neither")]
    CommandSpec { name: String },

    #[error("invalid stderr failure pattern for waker `{name}`: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("`{method}` is not a dotted interface.method name")]
    MethodName { method: String },
}

/// Errors that end an idle inhibition session
#[derive(Debug, Error)]
pub enum BusError {
    #[error("cannot connect to the session bus: {0}")]
    Connection(#[source] zbus::Error),

    #[error("cannot introspect {path} on {service}: {source}")]
    Introspect {
        service: String,
        path: String,
        #[source]
        source: zbus::Error,
    },

    #[error("{service} does not implement {interface}")]
    InterfaceNotFound { service: String, interface: String },

    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: zbus::Error,
    },

    #[error("{call} got no reply within {timeout:?}")]
    Timeout { call: &'static str, timeout: Duration },
}
