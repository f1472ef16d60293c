//! The daemon's event loop
//!
//! Everything that mutates state runs here, on one task: hot-plug events go
//! to the watchers, watcher notifications go to the gate, and the gate spawns
//! the wake tasks.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use joywake_config::Config;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::device;
use crate::gate::{GateError, WakeGate};
use crate::hotplug::HotplugMonitor;
use crate::waker;
use crate::watcher::{JoystickWatcher, NodeOpener, WatchEvent, WATCH_CHANNEL_BUFFER};

#[cfg(feature = "midi")]
use crate::watcher::{AlsaSequencer, MidiWatcher, WatchSender};

#[cfg(feature = "midi")]
const MONITORED_SUBSYSTEMS: &[&str] = &["input", "sound"];
#[cfg(not(feature = "midi"))]
const MONITORED_SUBSYSTEMS: &[&str] = &["input"];

#[cfg(feature = "midi")]
fn start_midi(events: WatchSender) -> Option<MidiWatcher<AlsaSequencer>> {
    match AlsaSequencer::open(events) {
        Ok(sequencer) => {
            let mut watcher = MidiWatcher::new(sequencer);
            watcher.start();
            Some(watcher)
        }
        Err(e) => {
            tracing::warn!("MIDI watching disabled: {:#}", e);
            None
        }
    }
}

/// Which watcher a hot-plug event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HotplugTarget {
    Joystick,
    Midi,
    Ignored,
}

fn hotplug_target(subsystem: Option<&str>) -> HotplugTarget {
    match subsystem {
        Some("input") => HotplugTarget::Joystick,
        Some("sound") if cfg!(feature = "midi") => HotplugTarget::Midi,
        _ => HotplugTarget::Ignored,
    }
}

/// Act on one watcher notification; an error ends the daemon
fn handle_watch_event<O: NodeOpener>(
    gate: &mut WakeGate,
    joysticks: &mut JoystickWatcher<O>,
    event: WatchEvent,
) -> Result<()> {
    match event {
        WatchEvent::Activity { source } => match gate.trigger() {
            Ok(true) => tracing::debug!("Activity on {}", source),
            Ok(false) => {}
            Err(e @ GateError::Exhausted) => {
                tracing::error!("{}", e);
                return Err(e.into());
            }
        },
        WatchEvent::Vanished { parent_key, name } => joysticks.forget(&parent_key, &name),
        WatchEvent::Failed { name, error } => {
            tracing::error!("Reading {} failed: {}", name, error);
            return Err(error).with_context(|| format!("Reading {} failed", name));
        }
    }
    Ok(())
}

/// Run until interrupted, or until no waker is left.
pub async fn run(config: &Config, current_desktops: &[String]) -> Result<()> {
    let wakers = waker::build_chain(config, current_desktops)
        .context("Failed to set up wakers")?;
    let mut gate = WakeGate::new(wakers, Duration::from_secs(config.cooldown));

    tracing::info!(
        "Wakers: {} (cooldown {}s)",
        gate.waker_names().join(", "),
        config.cooldown
    );

    let (events_tx, mut events) = mpsc::channel(WATCH_CHANNEL_BUFFER);

    // Monitor before enumerating so nothing plugged in between is missed;
    // a device seen by both is ignored the second time
    let mut monitor =
        HotplugMonitor::new(MONITORED_SUBSYSTEMS).context("Failed to open udev monitor")?;

    let mut joysticks = JoystickWatcher::system(events_tx.clone());
    joysticks.start(device::enumerate_joysticks()?);

    #[cfg(feature = "midi")]
    let mut midi = start_midi(events_tx.clone());

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tracing::info!("joywake daemon running");

    loop {
        tokio::select! {
            event = monitor.next_event() => {
                let event = match event {
                    Some(event) => event.context("udev monitor failed")?,
                    None => bail!("udev monitor closed"),
                };
                match hotplug_target(event.device().subsystem.as_deref()) {
                    HotplugTarget::Joystick => joysticks.handle_hotplug(event),
                    HotplugTarget::Midi => {
                        #[cfg(feature = "midi")]
                        {
                            if let Some(midi) = midi.as_mut() {
                                midi.handle_hotplug(&event);
                            }
                        }
                    }
                    HotplugTarget::Ignored => tracing::trace!(
                        "Ignoring event from subsystem {:?}",
                        event.device().subsystem
                    ),
                }
            }

            Some(event) = events.recv() => {
                handle_watch_event(&mut gate, &mut joysticks, event)?;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }

            _ = sigterm.recv() => {
                tracing::info!("Terminated, shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use crate::device::test_device;
    use crate::waker::testing::FakeWaker;
    use crate::waker::Waker;
    use crate::watcher::testing::PipeOpener;

    const PARENT: &str = "/sys/devices/usb1/1-2/input/input9";

    fn gate_with(fake: &Arc<FakeWaker>) -> WakeGate {
        WakeGate::new(vec![Arc::clone(fake) as Arc<dyn Waker>], Duration::from_secs(30))
    }

    fn joysticks() -> JoystickWatcher<PipeOpener> {
        let (tx, _rx) = mpsc::channel(WATCH_CHANNEL_BUFFER);
        JoystickWatcher::new(PipeOpener::default(), tx)
    }

    fn activity() -> WatchEvent {
        WatchEvent::Activity {
            source: "js0".to_string(),
        }
    }

    #[test]
    fn test_hotplug_routing() {
        assert_eq!(hotplug_target(Some("input")), HotplugTarget::Joystick);
        assert_eq!(hotplug_target(Some("usb")), HotplugTarget::Ignored);
        assert_eq!(hotplug_target(None), HotplugTarget::Ignored);

        let sound = if cfg!(feature = "midi") {
            HotplugTarget::Midi
        } else {
            HotplugTarget::Ignored
        };
        assert_eq!(hotplug_target(Some("sound")), sound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_wakes_once_per_cooldown() {
        let fake = Arc::new(FakeWaker::new("fake"));
        let mut gate = gate_with(&fake);
        let mut joysticks = joysticks();

        handle_watch_event(&mut gate, &mut joysticks, activity()).unwrap();
        handle_watch_event(&mut gate, &mut joysticks, activity()).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(fake.wakes(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_stops_daemon() {
        let fake = Arc::new(FakeWaker::new("fake"));
        fake.fail();
        let mut gate = gate_with(&fake);
        let mut joysticks = joysticks();

        let err = handle_watch_event(&mut gate, &mut joysticks, activity()).unwrap_err();
        assert_eq!(err.downcast_ref::<GateError>(), Some(&GateError::Exhausted));
    }

    #[tokio::test]
    async fn test_read_failure_stops_daemon() {
        let fake = Arc::new(FakeWaker::new("fake"));
        let mut gate = gate_with(&fake);
        let mut joysticks = joysticks();

        let event = WatchEvent::Failed {
            name: "js0".to_string(),
            error: io::Error::from(io::ErrorKind::InvalidData),
        };
        let err = handle_watch_event(&mut gate, &mut joysticks, event).unwrap_err();

        assert_eq!(err.to_string(), "Reading js0 failed");
        assert!(err.downcast_ref::<io::Error>().is_some());
        assert_eq!(fake.wakes(), 0);
    }

    #[tokio::test]
    async fn test_vanished_device_is_forgotten() {
        let fake = Arc::new(FakeWaker::new("fake"));
        let mut gate = gate_with(&fake);
        let mut joysticks = joysticks();
        assert!(joysticks.add_device(&test_device("js0", PARENT, Some("/dev/input/js0"))));

        let stale = WatchEvent::Vanished {
            parent_key: PARENT.to_string(),
            name: "event3".to_string(),
        };
        handle_watch_event(&mut gate, &mut joysticks, stale).unwrap();
        assert_eq!(joysticks.watched_count(), 1);

        let gone = WatchEvent::Vanished {
            parent_key: PARENT.to_string(),
            name: "js0".to_string(),
        };
        handle_watch_event(&mut gate, &mut joysticks, gone).unwrap();
        assert_eq!(joysticks.watched_count(), 0);
    }
}
