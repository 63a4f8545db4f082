//! One-shot client commands: connect, authenticate, send a single request.
//!
//! The endpoint comes from `--socket`, then `TOUCHGATE_SOCKET`, then the
//! default runtime socket. The token comes from `--token-file`, then
//! `TOUCHGATE_TOKEN_FILE`, then the default token location. A client never
//! creates a token.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::default_socket_path;
use crate::socket::client::Connector;
use crate::socket::Endpoint;
use crate::token::{AuthToken, TokenStore};

/// A single request to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Liveness check.
    Ping,
    /// Humanized tap at screen coordinates.
    Tap { x: i32, y: i32 },
    /// Humanized swipe along `points`.
    Swipe { points: Vec<(i32, i32)>, duration_ms: i64 },
    /// Text input.
    Text(String),
    /// Print the device description.
    Info,
    /// Ask the server to stop.
    Shutdown,
}

/// Where to connect and with which token.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// `--socket` value.
    pub socket: Option<String>,
    /// `--token-file` value.
    pub token_file: Option<PathBuf>,
}

impl Target {
    /// Resolve the endpoint using `lookup` for environment variables.
    fn endpoint(&self, lookup: &impl Fn(&str) -> Option<String>) -> Endpoint {
        match self.socket.clone().or_else(|| lookup("TOUCHGATE_SOCKET")) {
            Some(socket) => Endpoint::parse(&socket),
            None => Endpoint::Path(default_socket_path()),
        }
    }

    /// Resolve the token file using `lookup` for environment variables.
    fn token_path(&self, lookup: &impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(path) = self.token_file.clone() {
            return Ok(path);
        }
        if let Some(path) = lookup("TOUCHGATE_TOKEN_FILE") {
            return Ok(PathBuf::from(path));
        }
        Ok(TokenStore::default_location()?.path().to_path_buf())
    }
}

/// Connect, send `request`, print its result.
pub fn run(target: &Target, request: Request) -> Result<()> {
    let lookup = |key: &str| std::env::var(key).ok();
    let endpoint = target.endpoint(&lookup);
    let token = read_token(&target.token_path(&lookup)?)?;

    let connector =
        Connector::connect(&endpoint, &token).with_context(|| format!("Failed to connect to {endpoint}"))?;
    let result = send(&connector, request);
    connector.close();
    result
}

fn read_token(path: &Path) -> Result<AuthToken> {
    TokenStore::load(path).with_context(|| format!("No valid token at {}", path.display()))
}

fn send(connector: &Connector, request: Request) -> Result<()> {
    match request {
        Request::Ping => {
            connector.ping()?;
            println!("pong");
        }
        Request::Tap { x, y } => {
            connector.tap(x, y)?;
            println!("tapped at ({x}, {y})");
        }
        Request::Swipe { points, duration_ms } => {
            let count = points.len();
            connector.swipe(points, duration_ms)?;
            println!("swiped through {count} points in {duration_ms} ms");
        }
        Request::Text(text) => {
            connector.text(&text)?;
            println!("sent {} characters", text.chars().count());
        }
        Request::Info => {
            let info = connector.device_info()?;
            print!("{}", super::probe::describe(&info));
        }
        Request::Shutdown => {
            connector.shutdown()?;
            println!("server shutting down");
        }
    }
    Ok(())
}
