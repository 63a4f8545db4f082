//! Local socket channel between automation clients and the injector.
//!
//! # Architecture
//!
//! ```text
//! Client process                        Server process (touchgate serve)
//! ┌──────────────────┐                 ┌─────────────────────────────┐
//! │ Connector        │                 │ Server (accept thread)      │
//! │  UnixStream      │◄───────────────►│  WorkerPool                 │
//! │  one request at  │  frames over    │   handle_connection/Session │
//! │  a time          │  Unix socket    │    Humanizer ──► Target     │
//! └──────────────────┘                 └─────────────────────────────┘
//! ```
//!
//! # Wire Protocol
//!
//! Frames: `[u8 type][u32 BE length][payload]`. Every multi-byte integer is
//! big-endian.
//!
//! See [`framing`] for the codec and [`protocol`] for the command catalog.

pub mod client;
pub mod framing;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;

use std::fmt;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Where the server listens.
///
/// Written as a filesystem path, or as `@name` for a Linux abstract-namespace
/// socket that has no file and vanishes with the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Socket file on disk.
    Path(PathBuf),
    /// Abstract-namespace name (without the leading `@`).
    Abstract(String),
}

impl Endpoint {
    /// Parse `@name` or a path.
    pub fn parse(address: &str) -> Self {
        match address.strip_prefix('@') {
            Some(name) => Self::Abstract(name.to_owned()),
            None => Self::Path(PathBuf::from(address)),
        }
    }

    /// Socket file, if this endpoint has one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Abstract(_) => None,
        }
    }

    /// Connect a client stream.
    pub fn connect(&self) -> io::Result<UnixStream> {
        match self {
            Self::Path(path) => UnixStream::connect(path),
            Self::Abstract(name) => UnixStream::connect_addr(&abstract_addr(name)?),
        }
    }

    /// Bind a listener. Path endpoints must be prepared by the caller
    /// (stale file removed, parent created).
    pub(crate) fn bind(&self) -> io::Result<UnixListener> {
        match self {
            Self::Path(path) => UnixListener::bind(path),
            Self::Abstract(name) => UnixListener::bind_addr(&abstract_addr(name)?),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Abstract(name) => write!(f, "@{name}"),
        }
    }
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    use std::os::linux::net::SocketAddrExt;
    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(target_os = "android")]
fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    use std::os::android::net::SocketAddrExt;
    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("abstract socket @{name} is only available on Linux and Android"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(Endpoint::parse("@touchgate"), Endpoint::Abstract("touchgate".into()));
        assert_eq!(
            Endpoint::parse("/run/touchgate.sock"),
            Endpoint::Path(PathBuf::from("/run/touchgate.sock"))
        );
        assert_eq!(Endpoint::parse("@touchgate").to_string(), "@touchgate");
        assert!(Endpoint::parse("@x").path().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_abstract_roundtrip() {
        let name = format!("touchgate-test-{}", std::process::id());
        let endpoint = Endpoint::Abstract(name);
        let listener = endpoint.bind().unwrap();
        let _client = endpoint.connect().unwrap();
        assert!(listener.accept().is_ok());
    }
}
