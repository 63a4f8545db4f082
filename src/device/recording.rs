//! In-memory injection target.
//!
//! Records every event sequence and text string instead of writing to a
//! device. Integration tests inspect the [`Recording`] handle; the server's
//! `--dry-run` mode uses it to exercise the full command path on machines
//! without a touchscreen. A long-running target caps its history with
//! [`RecordingTarget::with_history`] and keeps only running totals beyond it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

use super::InjectionTarget;
use crate::input::InputEvent;
use crate::socket::protocol::DeviceInfo;

#[derive(Debug, Default)]
struct State {
    sequences: Vec<Vec<InputEvent>>,
    texts: Vec<String>,
    initialized: bool,
    closed: u32,
    fail_with: Option<String>,
    /// Most entries kept per list; `None` keeps everything.
    history: Option<usize>,
    total_sequences: u64,
    total_events: u64,
}

/// Append `item`, dropping the oldest entries beyond `history`.
fn push_bounded<T>(items: &mut Vec<T>, item: T, history: Option<usize>) {
    match history {
        None => items.push(item),
        Some(0) => {}
        Some(limit) => {
            if items.len() >= limit {
                let excess = items.len() + 1 - limit;
                items.drain(..excess);
            }
            items.push(item);
        }
    }
}

/// Shared view of what a [`RecordingTarget`] received.
///
/// Cloning is cheap; all clones observe the same recording.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    state: Arc<Mutex<State>>,
}

impl Recording {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every retained `inject_events` call, in arrival order.
    pub fn sequences(&self) -> Vec<Vec<InputEvent>> {
        self.lock().sequences.clone()
    }

    /// Every retained `inject_text` call, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.lock().texts.clone()
    }

    /// Total number of events across retained sequences.
    pub fn event_count(&self) -> usize {
        self.lock().sequences.iter().map(Vec::len).sum()
    }

    /// `inject_events` calls ever accepted, retained or not.
    pub fn total_sequences(&self) -> u64 {
        self.lock().total_sequences
    }

    /// Events ever accepted, retained or not.
    pub fn total_events(&self) -> u64 {
        self.lock().total_events
    }

    /// Whether `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Number of `close` calls seen.
    pub fn close_count(&self) -> u32 {
        self.lock().closed
    }

    /// Make every following injection fail with `message`, or succeed
    /// again with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        self.lock().fail_with = message.map(str::to_owned);
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.sequences.clear();
        state.texts.clear();
    }
}

/// Injection target that records instead of writing.
#[derive(Debug)]
pub struct RecordingTarget {
    info: DeviceInfo,
    recording: Recording,
}

impl RecordingTarget {
    /// Target reporting `info` from `device_info`.
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            recording: Recording::default(),
        }
    }

    /// A device whose axes match a `width` x `height` screen one to one.
    pub fn for_screen(width: i32, height: i32) -> Self {
        Self::new(DeviceInfo {
            device_path: "recording".to_string(),
            screen_width: width,
            screen_height: height,
            max_x: width - 1,
            max_y: height - 1,
            max_pressure: 255,
            max_touch_major: 30,
        })
    }

    /// A 1080x2400 phone-like device.
    pub fn phone() -> Self {
        Self::for_screen(1080, 2400)
    }

    /// Keep at most `limit` sequences and texts, oldest dropped first.
    /// Zero keeps nothing but the totals.
    pub fn with_history(self, limit: usize) -> Self {
        self.recording.lock().history = Some(limit);
        self
    }

    /// Handle for inspecting what this target receives.
    pub fn recording(&self) -> Recording {
        self.recording.clone()
    }
}

impl InjectionTarget for RecordingTarget {
    fn initialize(&mut self) -> Result<()> {
        self.recording.lock().initialized = true;
        log::info!("[device] recording target ready ({})", self.info.device_path);
        Ok(())
    }

    fn inject_events(&mut self, events: &[InputEvent]) -> Result<()> {
        let mut state = self.recording.lock();
        if let Some(message) = &state.fail_with {
            bail!("{message}");
        }
        state.total_sequences += 1;
        state.total_events += events.len() as u64;
        let history = state.history;
        push_bounded(&mut state.sequences, events.to_vec(), history);
        log::info!(
            "[device] recorded {} events ({} gestures so far)",
            events.len(),
            state.total_sequences
        );
        Ok(())
    }

    fn inject_text(&mut self, text: &str) -> Result<()> {
        let mut state = self.recording.lock();
        if let Some(message) = &state.fail_with {
            bail!("{message}");
        }
        let history = state.history;
        push_bounded(&mut state.texts, text.to_owned(), history);
        log::info!("[device] recorded {} bytes of text", text.len());
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn close(&mut self) {
        self.recording.lock().closed += 1;
    }
}
