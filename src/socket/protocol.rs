//! Command and response catalog for the local socket protocol.
//!
//! Commands (client → server):
//!
//! | type   | command         | payload |
//! |--------|-----------------|---------|
//! | `0x00` | `Auth`          | 32 raw token bytes |
//! | `0x01` | `Ping`          | empty |
//! | `0x02` | `Tap`           | `x:i32 y:i32 n:i32 n×event` |
//! | `0x03` | `Swipe`         | `p:i32 durationMs:i64 p×(x:i32 y:i32) n:i32 n×event` |
//! | `0x04` | `Text`          | UTF-8 bytes (≤ 10,000) |
//! | `0x05` | `GetDeviceInfo` | empty |
//! | `0xFF` | `Shutdown`      | empty |
//!
//! An event is `type:u16 code:u16 value:i32`. Responses (server → client)
//! are `Ok(payload)` `0x00`, `Error(message)` `0x01` and `AuthRequired`
//! `0x02`.
//!
//! Encoding and decoding are pure and inverse on valid input.

use crate::constants::{
    MAX_DEVICE_PATH_BYTES, MAX_EVENTS, MAX_POINTS, MAX_TEXT_BYTES, TOKEN_LEN,
};
use crate::input::InputEvent;

use super::framing::{Frame, PayloadReader, ProtocolError};

/// Command type bytes.
pub mod command_type {
    /// Authenticate with the shared token.
    pub const AUTH: u8 = 0x00;
    /// Liveness check.
    pub const PING: u8 = 0x01;
    /// Tap at a point.
    pub const TAP: u8 = 0x02;
    /// Swipe along a path.
    pub const SWIPE: u8 = 0x03;
    /// Type text.
    pub const TEXT: u8 = 0x04;
    /// Query device capabilities.
    pub const GET_DEVICE_INFO: u8 = 0x05;
    /// Stop the server.
    pub const SHUTDOWN: u8 = 0xFF;
}

/// Response type bytes.
pub mod response_type {
    /// Command succeeded.
    pub const OK: u8 = 0x00;
    /// Command failed; payload is a UTF-8 message.
    pub const ERROR: u8 = 0x01;
    /// Session must authenticate first.
    pub const AUTH_REQUIRED: u8 = 0x02;
}

/// Encoded size of one [`InputEvent`].
const EVENT_SIZE: usize = 8;

/// Encoded size of one swipe point.
const POINT_SIZE: usize = 8;

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Present the shared token.
    Auth([u8; TOKEN_LEN]),

    /// Liveness check (still requires authentication).
    Ping,

    /// Tap at `(x, y)` in screen coordinates.
    ///
    /// An empty `events` list asks the server to synthesize a humanized
    /// tap; otherwise the events are injected verbatim.
    Tap {
        /// Screen X.
        x: i32,
        /// Screen Y.
        y: i32,
        /// Pre-humanized events, or empty.
        events: Vec<InputEvent>,
    },

    /// Swipe along `points` over `duration_ms`.
    ///
    /// Same convention as [`Command::Tap`] for `events`.
    Swipe {
        /// Path in screen coordinates, start first.
        points: Vec<(i32, i32)>,
        /// Requested gesture duration.
        duration_ms: i64,
        /// Pre-humanized events, or empty.
        events: Vec<InputEvent>,
    },

    /// Type text on the device.
    Text(String),

    /// Query the device's coordinate and pressure ranges.
    GetDeviceInfo,

    /// Stop the server.
    Shutdown,
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth(_) => "Auth",
            Command::Ping => "Ping",
            Command::Tap { .. } => "Tap",
            Command::Swipe { .. } => "Swipe",
            Command::Text(_) => "Text",
            Command::GetDeviceInfo => "GetDeviceInfo",
            Command::Shutdown => "Shutdown",
        }
    }

    /// Encode into a frame.
    pub fn encode(&self) -> Frame {
        match self {
            Command::Auth(token) => Frame::new(command_type::AUTH, token.to_vec()),
            Command::Ping => Frame::empty(command_type::PING),
            Command::Tap { x, y, events } => {
                let mut payload = Vec::with_capacity(12 + events.len() * EVENT_SIZE);
                payload.extend_from_slice(&x.to_be_bytes());
                payload.extend_from_slice(&y.to_be_bytes());
                put_events(&mut payload, events);
                Frame::new(command_type::TAP, payload)
            }
            Command::Swipe {
                points,
                duration_ms,
                events,
            } => {
                let mut payload = Vec::with_capacity(
                    16 + points.len() * POINT_SIZE + events.len() * EVENT_SIZE,
                );
                payload.extend_from_slice(&(points.len() as i32).to_be_bytes());
                payload.extend_from_slice(&duration_ms.to_be_bytes());
                for (x, y) in points {
                    payload.extend_from_slice(&x.to_be_bytes());
                    payload.extend_from_slice(&y.to_be_bytes());
                }
                put_events(&mut payload, events);
                Frame::new(command_type::SWIPE, payload)
            }
            Command::Text(text) => Frame::new(command_type::TEXT, text.as_bytes().to_vec()),
            Command::GetDeviceInfo => Frame::empty(command_type::GET_DEVICE_INFO),
            Command::Shutdown => Frame::empty(command_type::SHUTDOWN),
        }
    }

    /// Decode a frame into a command.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(&frame.payload);

        let command = match frame.frame_type {
            command_type::AUTH => {
                let token: [u8; TOKEN_LEN] =
                    frame.payload.as_slice().try_into().map_err(|_| {
                        ProtocolError::InvalidTokenLength {
                            expected: TOKEN_LEN,
                            actual: frame.payload.len(),
                        }
                    })?;
                reader.rest();
                Command::Auth(token)
            }
            command_type::PING => Command::Ping,
            command_type::TAP => {
                let x = reader.i32()?;
                let y = reader.i32()?;
                let events = get_events(&mut reader)?;
                Command::Tap { x, y, events }
            }
            command_type::SWIPE => {
                let count = reader.count("point count", MAX_POINTS, POINT_SIZE)?;
                let duration_ms = reader.i64()?;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    points.push((reader.i32()?, reader.i32()?));
                }
                let events = get_events(&mut reader)?;
                Command::Swipe {
                    points,
                    duration_ms,
                    events,
                }
            }
            command_type::TEXT => {
                if frame.payload.len() > MAX_TEXT_BYTES {
                    return Err(ProtocolError::OutOfBounds {
                        field: "text length",
                        declared: frame.payload.len() as u64,
                        max: MAX_TEXT_BYTES,
                    });
                }
                let text = std::str::from_utf8(reader.rest())
                    .map_err(|_| ProtocolError::InvalidUtf8("text"))?;
                Command::Text(text.to_owned())
            }
            command_type::GET_DEVICE_INFO => Command::GetDeviceInfo,
            command_type::SHUTDOWN => Command::Shutdown,
            other => return Err(ProtocolError::UnknownType(other)),
        };

        reader.finish()?;
        Ok(command)
    }
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success, with a command-specific payload (often empty).
    Ok(Vec<u8>),
    /// Failure, with a UTF-8 message.
    Error(Vec<u8>),
    /// The session is not authenticated.
    AuthRequired,
}

impl Response {
    /// `Ok` with an empty payload.
    pub fn ok() -> Self {
        Response::Ok(Vec::new())
    }

    /// `Error` carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into().into_bytes())
    }

    /// Error message as text, for `Error` responses.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Response::Error(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Encode into a frame.
    pub fn encode(&self) -> Frame {
        match self {
            Response::Ok(payload) => Frame::new(response_type::OK, payload.clone()),
            Response::Error(message) => Frame::new(response_type::ERROR, message.clone()),
            Response::AuthRequired => Frame::empty(response_type::AUTH_REQUIRED),
        }
    }

    /// Decode a frame into a response.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.frame_type {
            response_type::OK => Ok(Response::Ok(frame.payload.clone())),
            response_type::ERROR => Ok(Response::Error(frame.payload.clone())),
            response_type::AUTH_REQUIRED => {
                PayloadReader::new(&frame.payload).finish()?;
                Ok(Response::AuthRequired)
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Coordinate and pressure ranges of the injection device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device node path (at most 256 bytes on the wire).
    pub device_path: String,
    /// Display width in pixels.
    pub screen_width: i32,
    /// Display height in pixels.
    pub screen_height: i32,
    /// Maximum `ABS_MT_POSITION_X`.
    pub max_x: i32,
    /// Maximum `ABS_MT_POSITION_Y`.
    pub max_y: i32,
    /// Maximum `ABS_MT_PRESSURE`.
    pub max_pressure: i32,
    /// Maximum `ABS_MT_TOUCH_MAJOR`.
    pub max_touch_major: i32,
}

impl DeviceInfo {
    /// Encode as an `Ok` response payload.
    ///
    /// Paths longer than the wire limit are cut at a UTF-8 boundary.
    pub fn encode(&self) -> Vec<u8> {
        let path = truncate_utf8(&self.device_path, MAX_DEVICE_PATH_BYTES).as_bytes();
        let mut buf = Vec::with_capacity(4 + path.len() + 24);
        buf.extend_from_slice(&(path.len() as i32).to_be_bytes());
        buf.extend_from_slice(path);
        for value in [
            self.screen_width,
            self.screen_height,
            self.max_x,
            self.max_y,
            self.max_pressure,
            self.max_touch_major,
        ] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        buf
    }

    /// Decode from an `Ok` response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(payload);
        let path_len = reader.count("device path length", MAX_DEVICE_PATH_BYTES, 1)?;
        let device_path = std::str::from_utf8(reader.take(path_len)?)
            .map_err(|_| ProtocolError::InvalidUtf8("device path"))?
            .to_owned();
        let info = Self {
            device_path,
            screen_width: reader.i32()?,
            screen_height: reader.i32()?,
            max_x: reader.i32()?,
            max_y: reader.i32()?,
            max_pressure: reader.i32()?,
            max_touch_major: reader.i32()?,
        };
        reader.finish()?;
        Ok(info)
    }
}

fn put_events(buf: &mut Vec<u8>, events: &[InputEvent]) {
    buf.extend_from_slice(&(events.len() as i32).to_be_bytes());
    for event in events {
        buf.extend_from_slice(&event.event_type.to_be_bytes());
        buf.extend_from_slice(&event.code.to_be_bytes());
        buf.extend_from_slice(&event.value.to_be_bytes());
    }
}

fn get_events(reader: &mut PayloadReader<'_>) -> Result<Vec<InputEvent>, ProtocolError> {
    let count = reader.count("event count", MAX_EVENTS, EVENT_SIZE)?;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(InputEvent {
            event_type: reader.u16()?,
            code: reader.u16()?,
            value: reader.i32()?,
        });
    }
    Ok(events)
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
