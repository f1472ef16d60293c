//! Device watchers
//!
//! A watcher owns the open handles of one device class and reports activity
//! upward through a [`WatchEvent`] channel that the daemon loop drains.
//!
//! ## Architecture
//!
//! ```text
//! +----------------+      +--------+      +-----------+      +-----------+
//! | reader task    | ---> | mpsc   | ---> | daemon    | ---> | WakeGate  |
//! | (one per node) |      | channel|      | loop      |      |           |
//! +----------------+      +--------+      +-----------+      +-----------+
//! ```
//!
//! Every [`WatchedHandle`] spawns one reader task that owns the device file.
//! Dropping the handle aborts the task, which deregisters the descriptor
//! from the reactor and closes it.

mod joystick;
mod midi;

#[cfg(feature = "midi")]
mod alsa_seq;

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use joystick::{JoystickWatcher, DEFAULT_PREFERRED_PREFIX};
pub use midi::{MidiPort, MidiWatcher, Sequencer};

#[cfg(feature = "midi")]
pub use alsa_seq::AlsaSequencer;

/// Bytes drained per readiness wake.
///
/// Large enough to swallow a burst of analog-stick events (evdev events are
/// 24 bytes, joydev events 8) in one read so a busy controller does not
/// starve the other descriptors.
pub const READ_WINDOW: usize = 24 * 64;

/// Default buffer size for the watch event channel
pub const WATCH_CHANNEL_BUFFER: usize = 64;

/// Notifications sent from device readers to the daemon loop
#[derive(Debug)]
pub enum WatchEvent {
    /// The user did something on this device
    Activity { source: String },
    /// The device went away underneath its reader; the handle is dead
    Vanished { parent_key: String, name: String },
    /// Reading failed for a reason other than the device disappearing
    Failed { name: String, error: io::Error },
}

pub type WatchSender = mpsc::Sender<WatchEvent>;
pub type WatchReceiver = mpsc::Receiver<WatchEvent>;

/// Opens device nodes for reading
pub trait NodeOpener {
    fn open(&self, node: &Path) -> io::Result<File>;
}

/// Opens real device nodes read-only and non-blocking
#[derive(Debug, Default, Clone, Copy)]
pub struct SysOpener;

impl NodeOpener for SysOpener {
    fn open(&self, node: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(node)
    }
}

/// An open, monitored device file plus its identity
#[derive(Debug)]
pub struct WatchedHandle {
    name: String,
    parent_key: String,
    preferred: bool,
    reader: JoinHandle<()>,
}

impl WatchedHandle {
    /// Register `file` with the reactor and start reporting its activity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        name: &str,
        parent_key: &str,
        preferred: bool,
        file: File,
        events: WatchSender,
    ) -> io::Result<Self> {
        set_nonblocking(&file)?;
        let fd = AsyncFd::with_interest(file, Interest::READABLE)?;

        let reader = tokio::spawn(read_activity(
            fd,
            name.to_string(),
            parent_key.to_string(),
            events,
        ));

        Ok(Self {
            name: name.to_string(),
            parent_key: parent_key.to_string(),
            preferred,
            reader,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_key(&self) -> &str {
        &self.parent_key
    }

    pub fn is_preferred(&self) -> bool {
        self.preferred
    }
}

impl Drop for WatchedHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// The device behind the descriptor no longer exists
fn is_gone(error: &io::Error) -> bool {
    error.raw_os_error() == Some(Errno::ENODEV as i32)
}

/// Reader task body: one activity notification per readiness wake.
async fn read_activity(
    fd: AsyncFd<File>,
    name: String,
    parent_key: String,
    events: WatchSender,
) {
    let mut buf = [0u8; READ_WINDOW];

    let outcome = loop {
        let mut guard = match fd.readable().await {
            Ok(guard) => guard,
            Err(e) => break Err(e),
        };

        match guard.try_io(|inner| {
            let mut file = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(Ok(0)) => break Ok(()),
            Ok(Ok(_)) => {
                match events.try_send(WatchEvent::Activity {
                    source: name.clone(),
                }) {
                    // A pending notification already covers this burst
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
            Ok(Err(e)) => break Err(e),
            Err(_would_block) => continue,
        }
    };

    let event = match outcome {
        Ok(()) => WatchEvent::Vanished { parent_key, name },
        Err(e) if is_gone(&e) => WatchEvent::Vanished { parent_key, name },
        Err(error) => WatchEvent::Failed { name, error },
    };

    // Nobody listening any more means the daemon is shutting down
    let _ = events.send(event).await;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::fs::File;
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use super::NodeOpener;

    #[derive(Default)]
    struct PipeState {
        writers: HashMap<PathBuf, File>,
        opens: HashMap<PathBuf, usize>,
        denied: HashSet<PathBuf>,
        missing: HashSet<PathBuf>,
    }

    /// Hands out pipe read ends in place of device nodes
    #[derive(Clone, Default)]
    pub(crate) struct PipeOpener {
        state: Arc<Mutex<PipeState>>,
    }

    impl PipeOpener {
        pub(crate) fn deny(&self, node: &str) {
            self.state.lock().unwrap().denied.insert(PathBuf::from(node));
        }

        pub(crate) fn remove_node(&self, node: &str) {
            self.state.lock().unwrap().missing.insert(PathBuf::from(node));
        }

        pub(crate) fn opens(&self, node: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .opens
                .get(Path::new(node))
                .copied()
                .unwrap_or(0)
        }

        /// Simulate input on the device
        pub(crate) fn write(&self, node: &str, bytes: &[u8]) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            let writer = state
                .writers
                .get_mut(Path::new(node))
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            writer.write_all(bytes)
        }

        /// Simulate the device disappearing by closing the write end
        pub(crate) fn unplug(&self, node: &str) {
            self.state.lock().unwrap().writers.remove(Path::new(node));
        }
    }

    impl NodeOpener for PipeOpener {
        fn open(&self, node: &Path) -> io::Result<File> {
            let mut state = self.state.lock().unwrap();
            if state.denied.contains(node) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            if state.missing.contains(node) {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            let (read, write) = nix::unistd::pipe()?;
            *state.opens.entry(node.to_path_buf()).or_default() += 1;
            state.writers.insert(node.to_path_buf(), File::from(write));
            Ok(File::from(read))
        }
    }
}
