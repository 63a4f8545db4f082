//! Per-connection authentication state and command handling.
//!
//! # State machine
//!
//! ```text
//!                 valid Auth                     Shutdown
//! UNAUTHENTICATED ──────────► AUTHENTICATED ──────────────► CLOSED
//!   │  ▲                          │
//!   │  │ invalid Auth             │ any other command: executed
//!   │  │ (attempts ≤ max): Error  │
//!   │  └──────────┘               │
//!   │ non-Auth: AuthRequired, stay
//!   └─ Auth after max failures ──────────────────────────► CLOSED
//! ```
//!
//! [`Session`] is the pure gate; [`handle_connection`] drives it over a
//! socket and executes admitted commands against the shared target.

use std::io::ErrorKind;
use std::os::unix::net::UnixStream;
use std::sync::PoisonError;

use anyhow::{bail, Result};

use super::framing::{Frame, FrameError};
use super::protocol::{Command, Response};
use super::server::ServerState;
use crate::humanize::{Sampler, StdSampler};
use crate::input::InputEvent;
use crate::token::AuthToken;

/// Authentication state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    authenticated: bool,
    auth_attempts: u32,
    max_auth_attempts: u32,
}

/// What to do with a decoded command.
#[derive(Debug, PartialEq, Eq)]
pub enum Gate {
    /// Authenticated: execute it.
    Dispatch(Command),
    /// Answer without executing.
    Reply(Response),
    /// Drop the connection without answering.
    Close,
}

impl Session {
    /// Fresh, unauthenticated session.
    pub fn new(max_auth_attempts: u32) -> Self {
        Self {
            authenticated: false,
            auth_attempts: 0,
            max_auth_attempts,
        }
    }

    /// Whether a valid `Auth` has been seen.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Failed `Auth` commands so far.
    pub fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    /// Decide what happens to `command`.
    ///
    /// Once `max_auth_attempts` failures have accumulated, the next `Auth`
    /// closes the connection even if its token is correct.
    pub fn admit(&mut self, command: Command, token: &AuthToken) -> Gate {
        match command {
            Command::Auth(candidate) => {
                if self.auth_attempts >= self.max_auth_attempts {
                    self.auth_attempts = self.auth_attempts.saturating_add(1);
                    return Gate::Close;
                }
                if token.verify(&candidate) {
                    self.authenticated = true;
                    Gate::Reply(Response::ok())
                } else {
                    self.auth_attempts += 1;
                    Gate::Reply(Response::error("authentication failed"))
                }
            }
            _ if !self.authenticated => Gate::Reply(Response::AuthRequired),
            command => Gate::Dispatch(command),
        }
    }
}

/// Serve one connection until it closes, times out, misbehaves, or asks the
/// server to shut down.
pub(crate) fn handle_connection(mut stream: UnixStream, state: &ServerState) {
    let Some(registration) = state.connections.register(&stream) else {
        return;
    };
    let conn_id = registration.id();

    if let Err(e) = stream.set_read_timeout(Some(state.config.read_timeout())) {
        log::warn!("[session] #{conn_id} failed to set read timeout: {e}");
        return;
    }

    let mut session = Session::new(state.config.max_auth_attempts);
    let mut sampler = StdSampler::from_os_rng();
    log::debug!("[session] #{conn_id} opened");

    loop {
        if state.is_shutting_down() {
            log::debug!("[session] #{conn_id} closing for server shutdown");
            break;
        }
        let frame = match Frame::read_from(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("[session] #{conn_id} closed by client");
                break;
            }
            Err(FrameError::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                log::info!("[session] #{conn_id} idle past read timeout, closing");
                break;
            }
            Err(FrameError::Io(e)) => {
                log::debug!("[session] #{conn_id} read failed: {e}");
                break;
            }
            Err(FrameError::Protocol(e)) => {
                log::warn!("[session] #{conn_id} bad frame: {e}");
                break;
            }
        };

        let command = match Command::decode(&frame) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("[session] #{conn_id} bad command (type 0x{:02x}): {e}", frame.frame_type);
                break;
            }
        };
        let name = command.name();

        let (response, shutdown) = match session.admit(command, &state.token) {
            Gate::Close => {
                log::warn!(
                    "[session] #{conn_id} closed after {} failed auth attempts",
                    session.auth_attempts() - 1
                );
                break;
            }
            Gate::Reply(response) => {
                if name == "Auth" {
                    if session.is_authenticated() {
                        log::info!("[session] #{conn_id} authenticated");
                    } else {
                        log::warn!("[session] #{conn_id} auth failed ({} so far)", session.auth_attempts());
                    }
                } else {
                    log::debug!("[session] #{conn_id} {name} rejected: not authenticated");
                }
                (response, false)
            }
            Gate::Dispatch(command) => {
                let shutdown = matches!(command, Command::Shutdown);
                (execute(state, &mut sampler, command), shutdown)
            }
        };

        if let Err(e) = response.encode().write_to(&mut stream) {
            log::debug!("[session] #{conn_id} write failed: {e}");
            break;
        }
        if shutdown {
            log::info!("[session] #{conn_id} requested server shutdown");
            state.request_shutdown();
            break;
        }
    }
}

/// Run an admitted command and build its response.
fn execute(state: &ServerState, sampler: &mut dyn Sampler, command: Command) -> Response {
    let result = match command {
        // Handled by `Session::admit`; never dispatched.
        Command::Auth(_) => Ok(Response::ok()),
        Command::Ping | Command::Shutdown => Ok(Response::ok()),
        Command::Tap { x, y, events } => {
            let injected = if events.is_empty() {
                humanized(state, sampler, |sampler| {
                    state.humanizer.generate_tap(
                        sampler,
                        x,
                        y,
                        state.config.default_element_size,
                        &state.device_info,
                    )
                })
            } else {
                inject(state, &events)
            };
            injected.map(|()| Response::ok())
        }
        Command::Swipe {
            points,
            duration_ms,
            events,
        } => {
            let injected = if !events.is_empty() {
                inject(state, &events)
            } else if points.len() < 2 {
                Err(anyhow::anyhow!("swipe needs at least 2 points, got {}", points.len()))
            } else {
                humanized(state, sampler, |sampler| {
                    state
                        .humanizer
                        .generate_swipe(sampler, &points, duration_ms, &state.device_info)
                })
            };
            injected.map(|()| Response::ok())
        }
        Command::Text(text) => inject_text(state, &text).map(|()| Response::ok()),
        Command::GetDeviceInfo => Ok(Response::Ok(state.device_info.encode())),
    };

    result.unwrap_or_else(|e| {
        log::warn!("[session] command failed: {e:#}");
        Response::error(format!("{e:#}"))
    })
}

/// Generate a gesture outside the device lock, then inject it, with
/// reaction and settling delays around it when configured.
fn humanized(
    state: &ServerState,
    sampler: &mut dyn Sampler,
    generate: impl FnOnce(&mut dyn Sampler) -> Vec<InputEvent>,
) -> Result<()> {
    if state.config.humanize_delays {
        std::thread::sleep(state.humanizer.pre_action_delay(sampler));
    }
    let events = generate(sampler);
    inject(state, &events)?;
    if state.config.humanize_delays {
        std::thread::sleep(state.humanizer.post_action_delay(sampler));
    }
    Ok(())
}

fn inject(state: &ServerState, events: &[InputEvent]) -> Result<()> {
    if events.is_empty() {
        bail!("no events to inject");
    }
    let mut target = state.target.lock().unwrap_or_else(PoisonError::into_inner);
    target.inject_events(events)
}

fn inject_text(state: &ServerState, text: &str) -> Result<()> {
    let mut target = state.target.lock().unwrap_or_else(PoisonError::into_inner);
    target.inject_text(text)
}
