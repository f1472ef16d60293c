//! Configuration data model

/// Default minimum spacing between wake fan-outs, in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: LogLevel,
    /// Minimum number of seconds between two wake cycles
    pub cooldown: u64,
    /// Custom shell line run as an extra waker
    pub command: Option<String>,
    /// Hold an idle-inhibition lease while controllers are active
    pub inhibit: bool,
    /// Names of built-in wakers that must not be used
    pub disabled_wakers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            cooldown: DEFAULT_COOLDOWN_SECS,
            command: None,
            inhibit: false,
            disabled_wakers: Vec::new(),
        }
    }
}

impl Config {
    /// Check whether the waker called `name` is enabled
    pub fn waker_enabled(&self, name: &str) -> bool {
        !self.disabled_wakers.iter().any(|disabled| disabled == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Environment variable listing the running desktop environments
pub const CURRENT_DESKTOP_ENV: &str = "XDG_CURRENT_DESKTOP";

/// Desktop environment identifiers of the current session.
///
/// Reads `$XDG_CURRENT_DESKTOP`; an unset variable means no desktop is known.
pub fn desktop_environments() -> Vec<String> {
    std::env::var(CURRENT_DESKTOP_ENV)
        .map(|value| parse_desktop_list(&value))
        .unwrap_or_default()
}

/// Split a colon separated desktop list, dropping empty entries
pub fn parse_desktop_list(value: &str) -> Vec<String> {
    value
        .split(':')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_desktop_list() {
        assert_eq!(
            parse_desktop_list("ubuntu:GNOME"),
            vec!["ubuntu".to_string(), "GNOME".to_string()]
        );
        assert_eq!(parse_desktop_list("X-Cinnamon"), vec!["X-Cinnamon".to_string()]);
        assert!(parse_desktop_list("").is_empty());
        assert_eq!(parse_desktop_list("KDE::"), vec!["KDE".to_string()]);
    }

    #[test]
    fn test_waker_enabled() {
        let config = Config {
            disabled_wakers: vec!["xscreensaver".to_string()],
            ..Config::default()
        };
        assert!(!config.waker_enabled("xscreensaver"));
        assert!(config.waker_enabled("freedesktop"));
    }

    #[test]
    fn test_log_level_round_trip_through_filter() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let parsed: LogLevel = level.parse().unwrap();
            assert_eq!(parsed.as_filter(), level);
        }
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
