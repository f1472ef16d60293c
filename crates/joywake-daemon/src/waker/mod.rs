//! Screen wake strategies
//!
//! The chain is a flat list of independent [`Waker`]s. Each one decides on
//! its own when it has stopped working and raises its failure flag; the
//! [`WakeGate`](crate::gate::WakeGate) then prunes it on the next cycle.

mod dbus;
mod error;
mod exec;
mod inhibit;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use joywake_config::Config;

pub use dbus::{method_call_args, DbusWaker};
pub use error::{BusError, WakerError};
pub use exec::{ExecCommand, ExecWaker, SOFT_FAILURE_LIMIT};
pub use inhibit::{
    declares_interface, IdleInhibitor, InhibitConnector, InhibitService, Lease,
    ScreenSaverConnector, ScreenSaverSession, ROUND_TRIP_TIMEOUT,
};

/// A way of waking the screen
#[async_trait]
pub trait Waker: Send + Sync {
    fn name(&self) -> &str;

    /// Once true, stays true
    fn failed(&self) -> bool;

    /// Make one attempt. Problems are recorded in the waker's own state.
    async fn wake(&self);
}

/// Monotonic failure flag shared between a waker and its tasks
#[derive(Debug, Default)]
pub struct FailFlag(AtomicBool);

impl FailFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the flag; returns true only for the call that raised it
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Name of the waker running the configured command
pub const CUSTOM_WAKER: &str = "custom";
/// Name of the idle-inhibition waker
pub const INHIBIT_WAKER: &str = "inhibit";

/// Built-in `SimulateUserActivity` callers: (name, method, desktop)
const SIMULATE_ACTIVITY: &[(&str, &str, Option<&str>)] = &[
    (
        "freedesktop",
        "org.freedesktop.ScreenSaver.SimulateUserActivity",
        None,
    ),
    (
        "gnome",
        "org.gnome.ScreenSaver.SimulateUserActivity",
        Some("GNOME"),
    ),
    (
        "mate",
        "org.mate.ScreenSaver.SimulateUserActivity",
        Some("MATE"),
    ),
    (
        "cinnamon",
        "org.cinnamon.ScreenSaver.SimulateUserActivity",
        Some("X-Cinnamon"),
    ),
];

/// xscreensaver exits 0 when no daemon is running but says so on stderr
const XSCREENSAVER_ARGS: &[&str] = &["xscreensaver-command", "-deactivate"];
const XSCREENSAVER_NOT_RUNNING: &str = "no screensaver is running";

/// Names of all built-in wakers, for validation and listings
pub fn builtin_names() -> Vec<&'static str> {
    SIMULATE_ACTIVITY
        .iter()
        .map(|(name, _, _)| *name)
        .chain(["xscreensaver"])
        .collect()
}

/// Assemble the waker chain for a configuration.
///
/// # Arguments
///
/// * `config` - Supplies the custom command, inhibit flag, cooldown and the
///   list of disabled built-ins
/// * `current_desktops` - Desktop environments of the session, used to gate
///   desktop-specific bus wakers
///
/// # Errors
///
/// Returns a [`WakerError`] if a waker cannot be constructed, which the
/// daemon treats as a startup failure.
pub fn build_chain(
    config: &Config,
    current_desktops: &[String],
) -> Result<Vec<Arc<dyn Waker>>, WakerError> {
    let mut chain: Vec<Arc<dyn Waker>> = Vec::new();

    if let Some(command) = &config.command {
        chain.push(Arc::new(ExecWaker::shell(CUSTOM_WAKER, command.clone())?));
    }

    if config.inhibit {
        chain.push(Arc::new(IdleInhibitor::new(
            INHIBIT_WAKER,
            ScreenSaverConnector::default(),
            Duration::from_secs(config.cooldown),
        )));
    }

    for (name, method, desktop) in SIMULATE_ACTIVITY {
        if !config.waker_enabled(name) {
            continue;
        }
        let waker = DbusWaker::new(*name, method, *desktop, current_desktops)?;
        if !waker.available() {
            tracing::debug!(waker = %name, "Not running under {}", desktop.unwrap_or("?"));
        }
        chain.push(Arc::new(waker));
    }

    if config.waker_enabled("xscreensaver") {
        let waker = ExecWaker::args("xscreensaver", XSCREENSAVER_ARGS)?
            .with_stderr_failure(XSCREENSAVER_NOT_RUNNING)?;
        chain.push(Arc::new(waker));
    }

    for disabled in &config.disabled_wakers {
        if !builtin_names().contains(&disabled.as_str()) {
            tracing::warn!("Unknown waker `{}` in disable list", disabled);
        }
    }

    Ok(chain)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::Waker;

    /// Counts wakes; can be failed from the outside
    #[derive(Debug)]
    pub(crate) struct FakeWaker {
        name: String,
        wakes: AtomicUsize,
        failed: AtomicBool,
    }

    impl FakeWaker {
        pub(crate) fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                wakes: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
            }
        }

        pub(crate) fn wakes(&self) -> usize {
            self.wakes.load(Ordering::SeqCst)
        }

        pub(crate) fn fail(&self) {
            self.failed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Waker for FakeWaker {
        fn name(&self) -> &str {
            &self.name
        }

        fn failed(&self) -> bool {
            self.failed.load(Ordering::SeqCst)
        }

        async fn wake(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
