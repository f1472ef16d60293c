//! ALSA sequencer backend for the MIDI watcher

use std::ffi::CString;
use std::io;
use std::sync::mpsc as std_mpsc;
use std::thread;

use alsa::seq::{Addr, ClientIter, Event, PortCap, PortIter, PortSubscribe, PortType, Seq};
use anyhow::{Context, Result};
use nix::errno::Errno;
use tokio::sync::mpsc::error::TrySendError;

use super::{MidiPort, Sequencer, WatchEvent, WatchSender};

const CLIENT_NAME: &str = "joywake";
const PORT_NAME: &str = "activity";
const SOURCE: &str = "midi";

/// Sequencer client that funnels every subscribed port into one reader.
///
/// Two clients are opened: the reader thread owns a capture client that
/// blocks in `event_input`, and this struct keeps a control client for
/// listing ports and managing subscriptions from the daemon loop.
pub struct AlsaSequencer {
    control: Seq,
    control_id: i32,
    dest: Addr,
}

impl AlsaSequencer {
    pub fn open(events: WatchSender) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("joywake-midi".to_string())
            .spawn(move || read_events(ready_tx, events))
            .context("Failed to start MIDI reader thread")?;

        let dest = ready_rx
            .recv()
            .context("MIDI reader thread exited during startup")??;

        let control = Seq::open(None, None, false).context("Failed to open ALSA sequencer")?;
        control.set_client_name(&CString::new(format!("{} control", CLIENT_NAME))?)?;
        let control_id = control.client_id()?;

        tracing::debug!("MIDI activity port is {}:{}", dest.client, dest.port);

        Ok(Self {
            control,
            control_id,
            dest,
        })
    }

    fn is_own_client(&self, client: i32) -> bool {
        client == self.control_id || client == self.dest.client
    }
}

impl Sequencer for AlsaSequencer {
    fn input_ports(&self) -> Result<Vec<MidiPort>> {
        let wanted = PortCap::READ | PortCap::SUBS_READ;
        let mut ports = Vec::new();

        for client in ClientIter::new(&self.control) {
            let client_id = client.get_client();
            // Client 0 is the kernel's announce/timer client
            if client_id == 0 || self.is_own_client(client_id) {
                continue;
            }
            for port in PortIter::new(&self.control, client_id) {
                let caps = port.get_capability();
                if !caps.contains(wanted) || caps.contains(PortCap::NO_EXPORT) {
                    continue;
                }
                ports.push(MidiPort {
                    client: client_id,
                    port: port.get_port(),
                    name: port.get_name().unwrap_or("unnamed").to_string(),
                });
            }
        }

        Ok(ports)
    }

    fn connect(&mut self, port: &MidiPort) -> Result<()> {
        let subscription = PortSubscribe::empty()?;
        subscription.set_sender(Addr {
            client: port.client,
            port: port.port,
        });
        subscription.set_dest(self.dest);
        self.control.subscribe_port(&subscription)?;
        Ok(())
    }

    fn disconnect(&mut self, port: &MidiPort) -> Result<()> {
        let sender = Addr {
            client: port.client,
            port: port.port,
        };
        self.control.unsubscribe_port(sender, self.dest)?;
        Ok(())
    }
}

fn open_reader() -> Result<(Seq, Addr)> {
    let seq = Seq::open(None, Some(alsa::Direction::Capture), false)
        .context("Failed to open ALSA sequencer")?;
    seq.set_client_name(&CString::new(CLIENT_NAME)?)?;
    let port = seq.create_simple_port(
        &CString::new(PORT_NAME)?,
        PortCap::WRITE | PortCap::SUBS_WRITE,
        PortType::MIDI_GENERIC | PortType::APPLICATION,
    )?;
    let client = seq.client_id()?;
    Ok((seq, Addr { client, port }))
}

/// Which sequencer events count as user activity
fn is_interesting(_event: &Event<'_>) -> bool {
    true
}

fn read_events(ready: std_mpsc::Sender<Result<Addr>>, events: WatchSender) {
    let seq = match open_reader() {
        Ok((seq, addr)) => {
            let _ = ready.send(Ok(addr));
            seq
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut input = seq.input();
    loop {
        match input.event_input() {
            Ok(event) => {
                if !is_interesting(&event) {
                    continue;
                }
                match events.try_send(WatchEvent::Activity {
                    source: SOURCE.to_string(),
                }) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return,
                }
            }
            // Input queue overrun, events were dropped but the client is fine
            Err(e) if e.errno() == Errno::ENOSPC as i32 || e.errno() == Errno::EINTR as i32 => {
                continue
            }
            Err(e) => {
                let _ = events.blocking_send(WatchEvent::Failed {
                    name: SOURCE.to_string(),
                    error: io::Error::from_raw_os_error(e.errno()),
                });
                return;
            }
        }
    }
}
