//! Touchgate - authenticated local touch injection daemon.
//!
//! A server owns one raw input device and accepts commands over a Unix
//! socket. Clients authenticate with a shared 32-byte token, then ask for
//! taps, swipes, and text. Gestures arrive either as explicit event lists,
//! injected verbatim, or as bare coordinates, which the server turns into
//! human-looking multi-touch sequences.
//!
//! # Architecture
//!
//! - **Server** - Accept loop, worker pool, per-connection sessions
//! - **Connector** - Blocking client holding one authenticated session
//! - **Humanizer** - Randomized tap and swipe generation
//! - **InjectionTarget** - The device seam (evdev, or an in-memory recorder)
//!
//! # Modules
//!
//! - [`socket`] - Wire framing, protocol, server, and client
//! - [`humanize`] - Gesture generation
//! - [`device`] - Injection targets
//! - [`token`] - Shared-secret storage and comparison
//! - [`config`] - Server configuration loading

// Library modules
pub mod commands;
pub mod config;
pub mod constants;
pub mod device;
pub mod humanize;
pub mod input;
pub mod socket;
pub mod token;

// Re-export commonly used types
pub use config::ServerConfig;
pub use device::{InjectionTarget, Recording, RecordingTarget};
pub use humanize::{Humanizer, HumanizerConfig};
pub use input::InputEvent;
pub use socket::client::{ClientError, Connector};
pub use socket::protocol::{Command, DeviceInfo, Response};
pub use socket::server::Server;
pub use socket::Endpoint;
pub use token::{AuthToken, TokenStore};
