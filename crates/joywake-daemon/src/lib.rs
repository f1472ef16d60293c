//! joywake daemon library
//!
//! Watches game controllers for activity and keeps the screen awake while
//! they are used. The binary in `main.rs` only wires configuration and
//! logging around [`daemon::run`].

pub mod daemon;
pub mod device;
pub mod gate;
pub mod hotplug;
pub mod waker;
pub mod watcher;
