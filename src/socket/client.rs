//! Client side of the socket: one connection, authenticated once.
//!
//! # Lifecycle
//!
//! ```text
//! Connector::connect(endpoint, token) ──Auth──► Ok          (session ready)
//!                                           └─► Error       (Rejected)
//!
//! tap / swipe / text / ping ──► one request, block for its response
//!     I/O failure ──► connector torn down, ClientError::Connection (retryable)
//! ```
//!
//! Requests are serialized under a mutex, so a `Connector` can be shared
//! between threads. There is no internal retry: on a retryable error the
//! caller reconnects.

// Rust guideline compliant 2026-02

use std::io::{self, ErrorKind};
use std::os::unix::net::UnixStream;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::framing::{Frame, FrameError, ProtocolError};
use super::protocol::{Command, DeviceInfo, Response};
use super::Endpoint;
use crate::constants::{CLIENT_RESPONSE_TIMEOUT, MAX_EVENTS, MAX_POINTS, MAX_TEXT_BYTES};
use crate::input::InputEvent;
use crate::token::AuthToken;

/// Failure of a connector operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The socket failed; reconnecting may help.
    #[error("connection failed: {0}")]
    Connection(#[source] io::Error),

    /// The server answered with an error.
    #[error("{command} rejected: {message}")]
    Rejected {
        /// Command that failed.
        command: &'static str,
        /// Server-provided reason.
        message: String,
    },

    /// The server wants the session authenticated first.
    #[error("not authenticated")]
    AuthRequired,

    /// The server sent something undecodable.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is closed (by the server, or torn down earlier).
    #[error("connection closed")]
    Closed,

    /// The request breaks a protocol limit and was not sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Whether reconnecting and retrying is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An authenticated connection to the server.
#[derive(Debug)]
pub struct Connector {
    endpoint: Endpoint,
    stream: Mutex<Option<UnixStream>>,
    device_info: Mutex<Option<DeviceInfo>>,
}

impl Connector {
    /// Connect to `endpoint` and authenticate with `token`.
    pub fn connect(endpoint: &Endpoint, token: &AuthToken) -> Result<Self, ClientError> {
        Self::connect_with_timeout(endpoint, token, CLIENT_RESPONSE_TIMEOUT)
    }

    /// Like [`Connector::connect`], with a custom per-response timeout.
    pub fn connect_with_timeout(endpoint: &Endpoint, token: &AuthToken, timeout: Duration) -> Result<Self, ClientError> {
        let stream = endpoint.connect().map_err(ClientError::Connection)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(ClientError::Connection)?;

        let connector = Self {
            endpoint: endpoint.clone(),
            stream: Mutex::new(Some(stream)),
            device_info: Mutex::new(None),
        };
        connector.request(&Command::Auth(*token.as_bytes()))?;
        log::debug!("[client] authenticated to {endpoint}");
        Ok(connector)
    }

    /// Server address.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the connection is still usable.
    pub fn is_connected(&self) -> bool {
        lock(&self.stream).is_some()
    }

    /// Liveness check.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.request(&Command::Ping).map(drop)
    }

    /// Humanized tap at screen `(x, y)`; the server synthesizes the gesture.
    pub fn tap(&self, x: i32, y: i32) -> Result<(), ClientError> {
        self.tap_with_events(x, y, Vec::new())
    }

    /// Tap by injecting `events` verbatim.
    pub fn tap_with_events(&self, x: i32, y: i32, events: Vec<InputEvent>) -> Result<(), ClientError> {
        check_events(&events)?;
        self.request(&Command::Tap { x, y, events }).map(drop)
    }

    /// Humanized swipe through `points` over `duration_ms`.
    pub fn swipe(&self, points: Vec<(i32, i32)>, duration_ms: i64) -> Result<(), ClientError> {
        if points.len() < 2 {
            return Err(ClientError::InvalidArgument(format!(
                "a swipe needs at least 2 points, got {}",
                points.len()
            )));
        }
        self.swipe_with_events(points, duration_ms, Vec::new())
    }

    /// Swipe by injecting `events` verbatim; `points` are informational.
    pub fn swipe_with_events(
        &self,
        points: Vec<(i32, i32)>,
        duration_ms: i64,
        events: Vec<InputEvent>,
    ) -> Result<(), ClientError> {
        if points.len() > MAX_POINTS {
            return Err(ClientError::InvalidArgument(format!(
                "{} points exceeds the limit of {MAX_POINTS}",
                points.len()
            )));
        }
        if duration_ms < 0 {
            return Err(ClientError::InvalidArgument(format!("negative duration {duration_ms}ms")));
        }
        check_events(&events)?;
        self.request(&Command::Swipe {
            points,
            duration_ms,
            events,
        })
        .map(drop)
    }

    /// Type `text` on the device.
    pub fn text(&self, text: &str) -> Result<(), ClientError> {
        if text.len() > MAX_TEXT_BYTES {
            return Err(ClientError::InvalidArgument(format!(
                "{} bytes of text exceeds the limit of {MAX_TEXT_BYTES}",
                text.len()
            )));
        }
        self.request(&Command::Text(text.to_owned())).map(drop)
    }

    /// Device capabilities, fetched once per connection.
    pub fn device_info(&self) -> Result<DeviceInfo, ClientError> {
        if let Some(info) = lock(&self.device_info).as_ref() {
            return Ok(info.clone());
        }
        let payload = self.request(&Command::GetDeviceInfo)?;
        let info = DeviceInfo::decode(&payload)?;
        *lock(&self.device_info) = Some(info.clone());
        Ok(info)
    }

    /// Ask the server to stop. The connection is closed afterwards.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.request(&Command::Shutdown)?;
        self.close();
        Ok(())
    }

    /// Drop the connection. Later requests fail with [`ClientError::Closed`].
    pub fn close(&self) {
        let mut stream = lock(&self.stream);
        if stream.take().is_some() {
            *lock(&self.device_info) = None;
            log::debug!("[client] disconnected from {}", self.endpoint);
        }
    }

    /// Send one command and wait for its response. Returns the `Ok` payload.
    fn request(&self, command: &Command) -> Result<Vec<u8>, ClientError> {
        let mut guard = lock(&self.stream);
        let Some(stream) = guard.as_mut() else {
            return Err(ClientError::Closed);
        };

        let exchanged = command
            .encode()
            .write_to(stream)
            .map_err(FrameError::Io)
            .and_then(|()| Frame::read_from(stream));

        let frame = match exchanged {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.teardown(&mut guard);
                return Err(ClientError::Closed);
            }
            Err(FrameError::Io(e)) => {
                self.teardown(&mut guard);
                return Err(if e.kind() == ErrorKind::UnexpectedEof {
                    ClientError::Closed
                } else {
                    ClientError::Connection(e)
                });
            }
            Err(FrameError::Protocol(e)) => {
                self.teardown(&mut guard);
                return Err(ClientError::Protocol(e));
            }
        };

        match Response::decode(&frame) {
            Ok(Response::Ok(payload)) => Ok(payload),
            Ok(response @ Response::Error(_)) => Err(ClientError::Rejected {
                command: command.name(),
                message: response.error_message().unwrap_or_default(),
            }),
            Ok(Response::AuthRequired) => Err(ClientError::AuthRequired),
            Err(e) => {
                self.teardown(&mut guard);
                Err(ClientError::Protocol(e))
            }
        }
    }

    fn teardown(&self, stream: &mut Option<UnixStream>) {
        if stream.take().is_some() {
            *lock(&self.device_info) = None;
            log::warn!("[client] connection to {} lost", self.endpoint);
        }
    }
}

fn check_events(events: &[InputEvent]) -> Result<(), ClientError> {
    if events.len() > MAX_EVENTS {
        return Err(ClientError::InvalidArgument(format!(
            "{} events exceeds the limit of {MAX_EVENTS}",
            events.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// Server stub: answers the Auth frame with `auth_reply`, then applies
    /// `then` to the stream.
    fn stub(
        dir: &TempDir,
        auth_reply: Response,
        then: impl FnOnce(&mut UnixStream) + Send + 'static,
    ) -> (Endpoint, thread::JoinHandle<()>) {
        let path = dir.path().join("stub.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let auth = Frame::read_from(&mut stream).unwrap().unwrap();
            assert!(matches!(Command::decode(&auth).unwrap(), Command::Auth(_)));
            auth_reply.encode().write_to(&mut stream).unwrap();
            then(&mut stream);
        });
        (Endpoint::Path(path), handle)
    }

    #[test]
    fn test_rejected_auth() {
        let dir = TempDir::new().unwrap();
        let (endpoint, handle) = stub(&dir, Response::error("authentication failed"), |_| {});
        let err = Connector::connect(&endpoint, &AuthToken::generate()).unwrap_err();
        assert!(matches!(err, ClientError::Rejected { command: "Auth", .. }), "{err:?}");
        assert!(!err.is_retryable());
        handle.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_retryable() {
        let dir = TempDir::new().unwrap();
        let endpoint = Endpoint::Path(dir.path().join("nobody.sock"));
        let err = Connector::connect(&endpoint, &AuthToken::generate()).unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[test]
    fn test_server_hangup_tears_down() {
        let dir = TempDir::new().unwrap();
        let (endpoint, handle) = stub(&dir, Response::ok(), |stream| {
            // Read the Ping, then hang up without answering.
            let _ = Frame::read_from(stream).unwrap();
        });
        let connector = Connector::connect(&endpoint, &AuthToken::generate()).unwrap();

        let err = connector.ping().unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, ClientError::Closed | ClientError::Connection(_)), "{err:?}");
        assert!(!connector.is_connected());
        assert!(matches!(connector.ping().unwrap_err(), ClientError::Closed));
    }

    #[test]
    fn test_oversized_response_is_protocol_error() {
        let dir = TempDir::new().unwrap();
        let (endpoint, handle) = stub(&dir, Response::ok(), |stream| {
            let _ = Frame::read_from(stream).unwrap();
            let mut header = vec![0x00];
            header.extend_from_slice(&2_000_000u32.to_be_bytes());
            stream.write_all(&header).unwrap();
        });
        let connector = Connector::connect(&endpoint, &AuthToken::generate()).unwrap();
        let err = connector.ping().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::OutOfBounds { .. })), "{err:?}");
        assert!(!connector.is_connected());
        handle.join().unwrap();
    }

    #[test]
    fn test_arguments_validated_before_sending() {
        let dir = TempDir::new().unwrap();
        let (endpoint, handle) = stub(&dir, Response::ok(), |stream| {
            // Nothing else should arrive before the client hangs up.
            assert!(Frame::read_from(stream).unwrap().is_none());
        });
        let connector = Connector::connect(&endpoint, &AuthToken::generate()).unwrap();

        let too_many = vec![InputEvent::syn(); MAX_EVENTS + 1];
        assert!(matches!(connector.tap_with_events(0, 0, too_many), Err(ClientError::InvalidArgument(_))));
        assert!(matches!(connector.swipe(vec![(0, 0)], 300), Err(ClientError::InvalidArgument(_))));
        assert!(matches!(
            connector.swipe(vec![(0, 0); MAX_POINTS + 1], 300),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(connector.swipe(vec![(0, 0), (1, 1)], -1), Err(ClientError::InvalidArgument(_))));
        assert!(matches!(
            connector.text(&"a".repeat(MAX_TEXT_BYTES + 1)),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(connector.is_connected());

        connector.close();
        handle.join().unwrap();
    }
}
