//! Input injection targets.
//!
//! An [`InjectionTarget`] owns exclusive access to one input device and
//! writes event sequences to it verbatim. The server holds exactly one
//! target behind a mutex so writes from concurrent connections never
//! interleave within a gesture.
//!
//! # Backends
//!
//! - [`EvdevTarget`]: a Linux/Android `/dev/input/event*` node
//! - [`RecordingTarget`]: in-memory; used by tests and `serve --dry-run`

// Rust guideline compliant 2026-02

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod evdev;
pub mod recording;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::input::{abs, key, InputEvent};
use crate::socket::protocol::DeviceInfo;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use evdev::EvdevTarget;
pub use recording::{Recording, RecordingTarget};

/// Tracking ID used by the plain (non-humanized) tap.
const PLAIN_TAP_TRACKING_ID: i32 = 1;

/// The single target shared by every connection handler.
pub type SharedTarget = Arc<Mutex<Box<dyn InjectionTarget>>>;

/// A device that accepts raw input event sequences.
pub trait InjectionTarget: Send + std::fmt::Debug {
    /// Probe for and open the device.
    ///
    /// An error here is unrecoverable: the server refuses to start.
    fn initialize(&mut self) -> Result<()>;

    /// Write `events` in order.
    ///
    /// Implementations must not reorder or merge events, and pause one
    /// event interval after every `SYN_REPORT`.
    fn inject_events(&mut self, events: &[InputEvent]) -> Result<()>;

    /// Type `text` on the device.
    fn inject_text(&mut self, text: &str) -> Result<()> {
        let _ = text;
        bail!("text input is not supported by this device")
    }

    /// Plain tap at device coordinates: touch down, hold, touch up.
    fn tap(&mut self, x: i32, y: i32, hold: Duration) -> Result<()> {
        self.inject_events(&[
            InputEvent::abs(abs::MT_TRACKING_ID, PLAIN_TAP_TRACKING_ID),
            InputEvent::key(key::BTN_TOUCH, true),
            InputEvent::abs(abs::MT_POSITION_X, x),
            InputEvent::abs(abs::MT_POSITION_Y, y),
            InputEvent::syn(),
        ])?;
        std::thread::sleep(hold);
        self.inject_events(&[
            InputEvent::abs(abs::MT_TRACKING_ID, -1),
            InputEvent::key(key::BTN_TOUCH, false),
            InputEvent::syn(),
        ])
    }

    /// Coordinate and pressure ranges of the open device.
    fn device_info(&self) -> DeviceInfo;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Wrap a target for sharing between handlers.
pub fn shared(target: Box<dyn InjectionTarget>) -> SharedTarget {
    Arc::new(Mutex::new(target))
}
