//! MIDI controller watcher
//!
//! The sound subsystem only tells us that hardware came or went. Activity is
//! read from the ALSA sequencer instead, so every hot-plug event just
//! triggers a reconcile of our subscriptions against the current port list.

use std::fmt;

use anyhow::Result;

use crate::hotplug::HotplugEvent;

/// A readable sequencer port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPort {
    pub client: i32,
    pub port: i32,
    pub name: String,
}

impl MidiPort {
    /// Ports are identified by address, names can change
    fn same_address(&self, other: &MidiPort) -> bool {
        self.client == other.client && self.port == other.port
    }
}

impl fmt::Display for MidiPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.client, self.port, self.name)
    }
}

/// Access to the MIDI sequencer
pub trait Sequencer {
    /// Ports other clients expose for reading
    fn input_ports(&self) -> Result<Vec<MidiPort>>;
    /// Route a port's events to our activity reader
    fn connect(&mut self, port: &MidiPort) -> Result<()>;
    fn disconnect(&mut self, port: &MidiPort) -> Result<()>;
}

/// Whether a port should be listened to at all
pub fn is_interesting_port(port: &MidiPort) -> bool {
    // "Midi Through" echoes whatever is sent to it, not user input
    !port.name.starts_with("Midi Through")
}

/// Keeps the sequencer subscribed to every interesting input port
pub struct MidiWatcher<S: Sequencer> {
    sequencer: S,
    connected: Vec<MidiPort>,
}

impl<S: Sequencer> MidiWatcher<S> {
    pub fn new(sequencer: S) -> Self {
        Self {
            sequencer,
            connected: Vec::new(),
        }
    }

    pub fn connected(&self) -> &[MidiPort] {
        &self.connected
    }

    pub fn start(&mut self) {
        self.reconcile();
        tracing::info!("Watching {} MIDI port(s)", self.connected.len());
    }

    pub fn handle_hotplug(&mut self, event: &HotplugEvent) {
        tracing::debug!(
            device = %event.device().sys_name,
            "Sound device changed, rescanning MIDI ports"
        );
        self.reconcile();
    }

    /// Disconnect ports that are gone and connect ports that are new
    pub fn reconcile(&mut self) {
        let available: Vec<MidiPort> = match self.sequencer.input_ports() {
            Ok(ports) => ports.into_iter().filter(is_interesting_port).collect(),
            Err(e) => {
                tracing::warn!("Failed to list MIDI ports: {:#}", e);
                return;
            }
        };

        let (kept, stale): (Vec<MidiPort>, Vec<MidiPort>) = std::mem::take(&mut self.connected)
            .into_iter()
            .partition(|port| available.iter().any(|a| a.same_address(port)));

        for port in stale {
            // The kernel usually drops the subscription along with the port
            match self.sequencer.disconnect(&port) {
                Ok(()) => tracing::info!("Disconnected MIDI port {}", port),
                Err(e) => tracing::debug!("MIDI port {} already gone: {:#}", port, e),
            }
        }

        self.connected = kept;

        for port in available {
            if self.connected.iter().any(|c| c.same_address(&port)) {
                continue;
            }
            match self.sequencer.connect(&port) {
                Ok(()) => {
                    tracing::info!("Connected MIDI port {}", port);
                    self.connected.push(port);
                }
                Err(e) => tracing::warn!("Failed to connect MIDI port {}: {:#}", port, e),
            }
        }
    }
}
