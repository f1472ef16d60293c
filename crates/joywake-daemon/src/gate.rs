//! Debounced fan-out from device activity to the waker chain

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::waker::Waker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("all wakers have failed, nothing left to wake the screen with")]
    Exhausted,
}

/// Turns bursts of activity into at most one wake cycle per cooldown
pub struct WakeGate {
    wakers: Vec<Arc<dyn Waker>>,
    cooldown: Duration,
    last_wake: Option<Instant>,
}

impl WakeGate {
    pub fn new(wakers: Vec<Arc<dyn Waker>>, cooldown: Duration) -> Self {
        Self {
            wakers,
            cooldown,
            last_wake: None,
        }
    }

    /// Names of the wakers still in the chain
    pub fn waker_names(&self) -> Vec<&str> {
        self.wakers.iter().map(|waker| waker.name()).collect()
    }

    /// Report activity.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A wake cycle was started
    /// * `Ok(false)` - Still cooling down from the previous cycle
    /// * `Err(GateError::Exhausted)` - No working waker is left
    pub fn trigger(&mut self) -> Result<bool, GateError> {
        let now = Instant::now();
        if let Some(last) = self.last_wake {
            if now.duration_since(last) < self.cooldown {
                return Ok(false);
            }
        }

        self.prune();
        if self.wakers.is_empty() {
            return Err(GateError::Exhausted);
        }

        self.last_wake = Some(now);
        tracing::debug!("Waking screen via {}", self.waker_names().join(", "));

        for waker in &self.wakers {
            let waker = Arc::clone(waker);
            tokio::spawn(async move { waker.wake().await });
        }

        Ok(true)
    }

    fn prune(&mut self) {
        self.wakers.retain(|waker| {
            if waker.failed() {
                tracing::info!(waker = %waker.name(), "Dropping failed waker {}", waker.name());
                false
            } else {
                true
            }
        });
    }
}
