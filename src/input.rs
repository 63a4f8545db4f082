//! Raw kernel input event triples and the evdev codes touchgate emits.
//!
//! Only the subset of `linux/input-event-codes.h` needed for single-contact
//! multi-touch (protocol B) gestures is mirrored here.

/// Event types.
pub mod ev {
    /// Synchronization events.
    pub const SYN: u16 = 0x00;
    /// Key and button state changes.
    pub const KEY: u16 = 0x01;
    /// Absolute axis changes.
    pub const ABS: u16 = 0x03;
}

/// Synchronization codes.
pub mod syn {
    /// Marks the end of one coherent packet of events.
    pub const REPORT: u16 = 0x00;
}

/// Key codes.
pub mod key {
    /// Touch contact present.
    pub const BTN_TOUCH: u16 = 0x14a;
}

/// Absolute axis codes.
pub mod abs {
    /// Single-touch X, used when probing legacy devices.
    pub const X: u16 = 0x00;
    /// Major axis of the contact ellipse.
    pub const MT_TOUCH_MAJOR: u16 = 0x30;
    /// Contact X position.
    pub const MT_POSITION_X: u16 = 0x35;
    /// Contact Y position.
    pub const MT_POSITION_Y: u16 = 0x36;
    /// Contact tracking ID; `-1` releases the contact.
    pub const MT_TRACKING_ID: u16 = 0x39;
    /// Contact pressure.
    pub const MT_PRESSURE: u16 = 0x3a;
    /// Highest absolute axis code.
    pub const MAX: u16 = 0x3f;
}

/// One raw input event: `(type, code, value)`.
///
/// Order within a sequence is meaningful and preserved end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputEvent {
    /// Event type (`EV_*`).
    pub event_type: u16,
    /// Event code within the type.
    pub code: u16,
    /// Event value.
    pub value: i32,
}

impl InputEvent {
    /// Construct an event triple.
    pub const fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            event_type,
            code,
            value,
        }
    }

    /// Absolute axis event.
    pub const fn abs(code: u16, value: i32) -> Self {
        Self::new(ev::ABS, code, value)
    }

    /// Key/button event.
    pub const fn key(code: u16, pressed: bool) -> Self {
        Self::new(ev::KEY, code, pressed as i32)
    }

    /// `SYN_REPORT` packet terminator.
    pub const fn syn() -> Self {
        Self::new(ev::SYN, syn::REPORT, 0)
    }

    /// Returns true for the `SYN_REPORT` packet terminator.
    pub fn is_syn_report(&self) -> bool {
        self.event_type == ev::SYN && self.code == syn::REPORT
    }
}
