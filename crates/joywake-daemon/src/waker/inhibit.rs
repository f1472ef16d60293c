//! Idle inhibition over the session bus
//!
//! Instead of poking the screensaver, [`IdleInhibitor`] holds an inhibition
//! lease while activity keeps coming in. Wakes are turned into pings for a
//! background session task:
//!
//! ```text
//!            ping / Inhibit()
//!   Idle  ------------------->  Holding(cookie)
//!    ^                             |    ^
//!    |   holdtime without pings    |    | ping (window re-armed)
//!    +------ UnInhibit(cookie) ----+----+
//! ```
//!
//! Any bus error or a call exceeding [`ROUND_TRIP_TIMEOUT`] ends the session
//! and fails the waker. It is never restarted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;

use super::{BusError, FailFlag, Waker};

/// Upper bound for a single bus round trip
pub const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(5);

pub const SCREENSAVER_SERVICE: &str = "org.freedesktop.ScreenSaver";
pub const SCREENSAVER_PATH: &str = "/org/freedesktop/ScreenSaver";
pub const SCREENSAVER_INTERFACE: &str = "org.freedesktop.ScreenSaver";

/// State of the inhibition lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    Idle,
    Holding(u32),
}

/// A connected inhibition service
#[async_trait]
pub trait InhibitService: Send {
    /// Take a lease, returning its cookie
    async fn inhibit(&mut self) -> Result<u32, BusError>;
    async fn uninhibit(&mut self, cookie: u32) -> Result<(), BusError>;
}

/// Establishes the connection a session runs on
#[async_trait]
pub trait InhibitConnector: Send + Sync + 'static {
    type Service: InhibitService + 'static;

    async fn connect(&self) -> Result<Self::Service, BusError>;
}

struct SessionShared {
    ping: Notify,
    running: AtomicBool,
    failed: FailFlag,
}

/// Waker that keeps an idle-inhibition lease alive while woken
pub struct IdleInhibitor<C: InhibitConnector> {
    name: String,
    connector: Arc<C>,
    holdtime: Duration,
    shared: Arc<SessionShared>,
}

impl<C: InhibitConnector> IdleInhibitor<C> {
    /// The lease is held for twice the gate cooldown after the last ping,
    /// so a steadily used controller never lets it lapse.
    pub fn new(name: impl Into<String>, connector: C, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            connector: Arc::new(connector),
            holdtime: cooldown.saturating_mul(2),
            shared: Arc::new(SessionShared {
                ping: Notify::new(),
                running: AtomicBool::new(false),
                failed: FailFlag::default(),
            }),
        }
    }

    pub fn holdtime(&self) -> Duration {
        self.holdtime
    }
}

#[async_trait]
impl<C: InhibitConnector> Waker for IdleInhibitor<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn failed(&self) -> bool {
        self.shared.failed.is_set()
    }

    async fn wake(&self) {
        if self.failed() {
            return;
        }

        if !self.shared.running.swap(true, Ordering::AcqRel) {
            let session = Session {
                name: self.name.clone(),
                connector: Arc::clone(&self.connector),
                holdtime: self.holdtime,
                shared: Arc::clone(&self.shared),
            };
            tokio::spawn(session.run());
        }

        // Stores a single permit if the session is busy; extra pings coalesce
        self.shared.ping.notify_one();
    }
}

struct Session<C: InhibitConnector> {
    name: String,
    connector: Arc<C>,
    holdtime: Duration,
    shared: Arc<SessionShared>,
}

impl<C: InhibitConnector> Session<C> {
    async fn run(self) {
        if let Err(e) = self.hold_leases().await {
            tracing::warn!(waker = %self.name, "Idle inhibition stopped: {}", e);
        }
        self.shared.failed.set();
        self.shared.running.store(false, Ordering::Release);
    }

    async fn hold_leases(&self) -> Result<(), BusError> {
        let mut service = round_trip("connect", self.connector.connect()).await?;
        let mut lease = Lease::Idle;

        tracing::debug!(waker = %self.name, "Inhibition session started");

        loop {
            let pinged = match lease {
                Lease::Idle => {
                    self.shared.ping.notified().await;
                    true
                }
                Lease::Holding(_) => timeout(self.holdtime, self.shared.ping.notified())
                    .await
                    .is_ok(),
            };

            lease = match (lease, pinged) {
                (Lease::Idle, _) => {
                    let cookie = round_trip("Inhibit", service.inhibit()).await?;
                    tracing::debug!(waker = %self.name, "Inhibiting idle (cookie {})", cookie);
                    Lease::Holding(cookie)
                }
                (Lease::Holding(cookie), true) => Lease::Holding(cookie),
                (Lease::Holding(cookie), false) => {
                    round_trip("UnInhibit", service.uninhibit(cookie)).await?;
                    tracing::debug!(
                        waker = %self.name,
                        "No activity for {:?}, released cookie {}",
                        self.holdtime,
                        cookie
                    );
                    Lease::Idle
                }
            };
        }
    }
}

async fn round_trip<T, F>(call: &'static str, future: F) -> Result<T, BusError>
where
    F: Future<Output = Result<T, BusError>>,
{
    timeout(ROUND_TRIP_TIMEOUT, future)
        .await
        .map_err(|_| BusError::Timeout {
            call,
            timeout: ROUND_TRIP_TIMEOUT,
        })?
}

/// Whether introspection data declares `interface`
pub fn declares_interface(xml: &str, interface: &str) -> bool {
    xml.contains(&format!("<interface name=\"{}\"", interface))
}

/// Connects to `org.freedesktop.ScreenSaver` on the session bus
#[derive(Debug, Clone)]
pub struct ScreenSaverConnector {
    service: String,
    path: String,
    interface: String,
    application: String,
    reason: String,
}

impl Default for ScreenSaverConnector {
    fn default() -> Self {
        Self {
            service: SCREENSAVER_SERVICE.to_string(),
            path: SCREENSAVER_PATH.to_string(),
            interface: SCREENSAVER_INTERFACE.to_string(),
            application: "joywake".to_string(),
            reason: "Game controller in use".to_string(),
        }
    }
}

#[async_trait]
impl InhibitConnector for ScreenSaverConnector {
    type Service = ScreenSaverSession;

    async fn connect(&self) -> Result<ScreenSaverSession, BusError> {
        let connection = zbus::Connection::session()
            .await
            .map_err(BusError::Connection)?;

        let introspect_error = |source| BusError::Introspect {
            service: self.service.clone(),
            path: self.path.clone(),
            source,
        };

        let xml = zbus::fdo::IntrospectableProxy::builder(&connection)
            .destination(self.service.as_str())
            .map_err(introspect_error)?
            .path(self.path.as_str())
            .map_err(introspect_error)?
            .build()
            .await
            .map_err(introspect_error)?
            .introspect()
            .await
            .map_err(|e| introspect_error(e.into()))?;

        if !declares_interface(&xml, &self.interface) {
            return Err(BusError::InterfaceNotFound {
                service: self.service.clone(),
                interface: self.interface.clone(),
            });
        }

        Ok(ScreenSaverSession {
            connection,
            target: self.clone(),
        })
    }
}

/// Live connection to the screensaver service
pub struct ScreenSaverSession {
    connection: zbus::Connection,
    target: ScreenSaverConnector,
}

#[async_trait]
impl InhibitService for ScreenSaverSession {
    async fn inhibit(&mut self) -> Result<u32, BusError> {
        let call_error = |source| BusError::Call {
            call: "Inhibit",
            source,
        };
        let target = &self.target;

        let reply = self
            .connection
            .call_method(
                Some(target.service.as_str()),
                target.path.as_str(),
                Some(target.interface.as_str()),
                "Inhibit",
                &(target.application.as_str(), target.reason.as_str()),
            )
            .await
            .map_err(call_error)?;

        reply.body().deserialize::<u32>().map_err(call_error)
    }

    async fn uninhibit(&mut self, cookie: u32) -> Result<(), BusError> {
        let target = &self.target;

        self.connection
            .call_method(
                Some(target.service.as_str()),
                target.path.as_str(),
                Some(target.interface.as_str()),
                "UnInhibit",
                &cookie,
            )
            .await
            .map_err(|source| BusError::Call {
                call: "UnInhibit",
                source,
            })?;

        Ok(())
    }
}
