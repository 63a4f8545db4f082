//! Application-wide constants for touchgate.
//!
//! This module centralizes the protocol limits, timeouts and pool sizing
//! defaults so the server, the client connector and the configuration layer
//! agree on them.
//!
//! # Categories
//!
//! - **Protocol limits**: hard maximums enforced while decoding frames
//! - **Timeouts**: socket and shutdown bounds
//! - **Worker pool**: default sizing of the connection pool

use std::time::Duration;

// ============================================================================
// Protocol limits
// ============================================================================

/// Maximum frame payload size (1 MiB).
///
/// A frame header declaring more than this is rejected before the payload
/// is read or any buffer is allocated for it.
pub const MAX_FRAME_PAYLOAD: u32 = 1024 * 1024;

/// Maximum number of raw input events carried by one command.
pub const MAX_EVENTS: usize = 10_000;

/// Maximum number of points in one swipe path.
pub const MAX_POINTS: usize = 1_000;

/// Maximum size of a `Text` payload in bytes.
pub const MAX_TEXT_BYTES: usize = 10_000;

/// Maximum size of the device path inside a `DeviceInfo` payload.
pub const MAX_DEVICE_PATH_BYTES: usize = 256;

/// Length of the shared authentication secret in bytes.
pub const TOKEN_LEN: usize = 32;

// ============================================================================
// Authentication
// ============================================================================

/// Failed `Auth` commands tolerated per connection.
///
/// The attempt after the last tolerated failure closes the connection,
/// whether or not its token is correct.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-connection socket read timeout.
///
/// An idle or stalled client is dropped once a read blocks for this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the worker pool during shutdown.
///
/// Applied once for orderly shutdown and once more after forced
/// cancellation.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often the accept loop checks the shutdown flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Client-side read timeout for a single request/response round trip.
///
/// Long enough to cover a slow swipe plus humanized delays.
pub const CLIENT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Worker pool
// ============================================================================

/// Worker threads started with the pool and kept for its lifetime.
pub const DEFAULT_CORE_WORKERS: usize = 2;

/// Upper bound on worker threads, core threads included.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Connections that may wait for a free worker before backpressure kicks in.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Idle time after which a non-core worker thread exits.
pub const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(30);

// ============================================================================
// Socket
// ============================================================================

/// Maximum path length for a Unix domain socket (macOS kernel limit).
pub const MAX_SOCKET_PATH: usize = 104;
