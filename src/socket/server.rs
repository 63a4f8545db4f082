//! Authenticated local socket server.
//!
//! One accept thread polls a non-blocking listener and hands each
//! connection to the [`WorkerPool`]. When the pool is saturated the accept
//! thread runs the handler itself, so a flood of connections slows
//! acceptance down instead of growing without bound.
//!
//! # Shutdown sequence
//!
//! Triggered by the shutdown flag (signal handler, [`Server::shutdown`], or
//! an authenticated `Shutdown` command):
//!
//! 1. stop accepting and close the listener
//! 2. orderly pool shutdown, waiting up to the grace period
//! 3. if workers are still busy: drop queued connections and shut down
//!    every live socket, then wait once more
//! 4. close the injection target and remove the socket file
//!
//! A watchdog thread enforces the grace period on its own: once it expires
//! every live socket is shut down, including one being served on the
//! accept thread itself.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{bail, Context, Result};

use super::pool::{Job, WorkerPool};
use super::protocol::DeviceInfo;
use super::session::handle_connection;
use super::Endpoint;
use crate::config::ServerConfig;
use crate::constants::{ACCEPT_POLL_INTERVAL, MAX_SOCKET_PATH};
use crate::device::{self, InjectionTarget, SharedTarget};
use crate::humanize::Humanizer;
use crate::token::AuthToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Shared state ──────────────────────────────────────────────────────────

/// Everything a connection handler needs, shared read-only between
/// handlers (the target serializes writers behind its own mutex).
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) token: AuthToken,
    pub(crate) target: SharedTarget,
    pub(crate) humanizer: Humanizer,
    pub(crate) config: ServerConfig,
    /// Captured once at startup.
    pub(crate) device_info: DeviceInfo,
    pub(crate) connections: ConnectionRegistry,
    shutdown: Arc<AtomicBool>,
    /// Set once the shutdown sequence has completed.
    stopped: AtomicBool,
}

impl ServerState {
    /// Ask the accept loop to begin the shutdown sequence.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Live connections, so shutdown can force them closed.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, UnixStream>>,
    closed: AtomicBool,
}

/// Keeps a connection registered while alive.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    registry: &'a ConnectionRegistry,
    id: u64,
}

impl Registration<'_> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        lock(&self.registry.streams).remove(&self.id);
    }
}

impl ConnectionRegistry {
    /// Track `stream`. Returns `None` (and closes the stream) once the
    /// registry has been cancelled.
    pub(crate) fn register(&self, stream: &UnixStream) -> Option<Registration<'_>> {
        let handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("[server] failed to track connection: {e}");
                return None;
            }
        };
        let mut streams = lock(&self.streams);
        if self.closed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        streams.insert(id, handle);
        Some(Registration { registry: self, id })
    }

    /// Shut down every live connection and refuse new ones.
    pub(crate) fn cancel_all(&self) -> usize {
        let streams = lock(&self.streams);
        self.closed.store(true, Ordering::SeqCst);
        for stream in streams.values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        streams.len()
    }

    /// Connections currently being served.
    pub(crate) fn len(&self) -> usize {
        lock(&self.streams).len()
    }
}

// ─── Server ────────────────────────────────────────────────────────────────

/// A running server.
///
/// Dropping it requests shutdown and waits for the sequence to finish.
#[derive(Debug)]
pub struct Server {
    endpoint: Endpoint,
    state: Arc<ServerState>,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    watchdog_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Initialize `target`, bind the socket and start accepting.
    ///
    /// Fails closed: on any error nothing is left listening and the target
    /// is released.
    pub fn start(config: ServerConfig, token: AuthToken, mut target: Box<dyn InjectionTarget>) -> Result<Self> {
        config.validate()?;
        let humanizer = Humanizer::new(config.humanizer_config()?);

        target.initialize().context("Failed to initialize input device")?;
        let device_info = target.device_info();

        let endpoint = config.endpoint();
        let listener = match bind(&endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                target.close();
                return Err(e);
            }
        };

        let pool = WorkerPool::new(config.pool_config());
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(ServerState {
            token,
            target: device::shared(target),
            humanizer,
            config,
            device_info,
            connections: ConnectionRegistry::default(),
            shutdown: Arc::clone(&shutdown),
            stopped: AtomicBool::new(false),
        });

        log::info!(
            "[server] listening on {endpoint} (token {}, device {})",
            state.token.fingerprint(),
            state.device_info.device_path
        );

        let accept_state = Arc::clone(&state);
        let accept_endpoint = endpoint.clone();
        let accept_handle = thread::Builder::new()
            .name("touchgate-accept".to_string())
            .spawn(move || {
                accept_loop(&listener, &accept_state, &pool);
                drop(listener);
                shut_down(&accept_state, &pool, &accept_endpoint);
            })
            .context("Failed to spawn accept thread")?;

        let watchdog_state = Arc::clone(&state);
        let watchdog_handle = match thread::Builder::new()
            .name("touchgate-shutdown".to_string())
            .spawn(move || watchdog(&watchdog_state))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[server] failed to spawn shutdown watchdog: {e}");
                None
            }
        };

        Ok(Self {
            endpoint,
            state,
            shutdown,
            accept_handle: Some(accept_handle),
            watchdog_handle,
        })
    }

    /// Where the server listens.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Capabilities of the open device.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.state.device_info
    }

    /// Flag that starts the shutdown sequence when set.
    ///
    /// Suitable for `signal_hook::flag::register`.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until the server has shut down.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    /// Request shutdown and block until it completes.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let accept = self.accept_handle.take().map(JoinHandle::join);
        // The accept thread marks the server stopped; make sure the
        // watchdog sees that even if it panicked.
        self.state.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.watchdog_handle.take() {
            let _ = handle.join();
        }
        if matches!(accept, Some(Err(_))) {
            bail!("Accept thread panicked");
        }
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.accept_handle.is_some() {
            self.shutdown.store(true, Ordering::SeqCst);
            let _ = self.join();
        }
    }
}

/// Prepare the socket path and bind.
fn bind(endpoint: &Endpoint) -> Result<UnixListener> {
    let listener = match endpoint {
        Endpoint::Abstract(name) => {
            if name.len() >= MAX_SOCKET_PATH {
                bail!("Abstract socket name too long ({} bytes, max {})", name.len(), MAX_SOCKET_PATH - 1);
            }
            endpoint
                .bind()
                .with_context(|| format!("Failed to bind socket: {endpoint}"))?
        }
        Endpoint::Path(path) => {
            prepare_socket_path(path)?;
            let listener = endpoint
                .bind()
                .with_context(|| format!("Failed to bind socket: {}", path.display()))?;

            // Owner-only permissions (0600).
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict socket permissions: {}", path.display()))?;
            listener
        }
    };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Check the path length, create the parent, remove a stale socket.
fn prepare_socket_path(path: &Path) -> Result<()> {
    let path_len = path.as_os_str().len();
    if path_len >= MAX_SOCKET_PATH {
        bail!(
            "Socket path too long ({path_len} bytes, max {}): {}",
            MAX_SOCKET_PATH - 1,
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
            log::debug!("[server] removed stale socket {}", path.display());
        }
        Ok(_) => bail!("Refusing to replace non-socket file: {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
    }
    Ok(())
}

fn accept_loop(listener: &UnixListener, state: &Arc<ServerState>, pool: &WorkerPool) {
    while !state.shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => dispatch(stream, state, pool),
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                log::error!("[server] accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    log::info!("[server] shutdown requested, no longer accepting");
}

fn dispatch(stream: UnixStream, state: &Arc<ServerState>, pool: &WorkerPool) {
    // Accepted sockets may inherit O_NONBLOCK from the listener.
    if let Err(e) = stream.set_nonblocking(false) {
        log::warn!("[server] dropping connection: {e}");
        return;
    }

    let job_state = Arc::clone(state);
    let job: Job = Box::new(move || handle_connection(stream, &job_state));
    if let Err(job) = pool.execute(job) {
        log::debug!("[server] worker pool saturated, serving on the accept thread");
        job();
    }
}

/// Shut down every live connection once the grace period after a shutdown
/// request has run out, whatever the accept thread is doing.
fn watchdog(state: &ServerState) {
    while !state.is_shutting_down() {
        if state.stopped.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(ACCEPT_POLL_INTERVAL);
    }

    let deadline = Instant::now() + state.config.shutdown_grace();
    while Instant::now() < deadline {
        if state.stopped.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(ACCEPT_POLL_INTERVAL);
    }
    if !state.stopped.load(Ordering::SeqCst) {
        let live = state.connections.cancel_all();
        if live > 0 {
            log::warn!("[server] grace period expired: closed {live} live connection(s)");
        }
    }
}

fn shut_down(state: &ServerState, pool: &WorkerPool, endpoint: &Endpoint) {
    let grace = state.config.shutdown_grace();

    pool.shutdown();
    if !pool.await_termination(grace) {
        let dropped = pool.cancel_pending();
        let live = state.connections.cancel_all();
        log::warn!("[server] grace period expired: dropped {dropped} queued and closed {live} live connection(s)");
        if !pool.await_termination(grace) {
            log::error!("[server] {} worker(s) still running after forced cancellation", pool.live_workers());
        }
    } else {
        state.connections.cancel_all();
    }

    lock(&state.target).close();

    if let Some(path) = endpoint.path() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("[server] failed to remove {}: {e}", path.display());
            }
        }
    }
    state.stopped.store(true, Ordering::SeqCst);
    log::info!("[server] stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingTarget;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            socket: dir.path().join("tg.sock").to_string_lossy().into_owned(),
            humanize_delays: false,
            shutdown_grace_ms: 200,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_start_binds_owner_only_socket_and_cleans_up() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = RecordingTarget::phone();
        let recording = target.recording();
        let server = Server::start(config(&dir), AuthToken::generate(), Box::new(target)).unwrap();

        let path = dir.path().join("tg.sock");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(recording.is_initialized());

        server.shutdown().unwrap();
        assert!(!path.exists());
        assert_eq!(recording.close_count(), 1);
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tg.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = Server::start(config(&dir), AuthToken::generate(), Box::new(RecordingTarget::phone())).unwrap();
        assert!(UnixStream::connect(&path).is_ok());
        server.shutdown().unwrap();
    }

    #[test]
    fn test_refuses_to_replace_regular_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tg.sock"), b"not a socket").unwrap();
        let target = RecordingTarget::phone();
        let recording = target.recording();

        let err = Server::start(config(&dir), AuthToken::generate(), Box::new(target)).unwrap_err();
        assert!(err.to_string().contains("non-socket"));
        assert_eq!(recording.close_count(), 1);
    }

    #[test]
    fn test_rejects_long_socket_path() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.socket = format!("/tmp/{}.sock", "x".repeat(MAX_SOCKET_PATH));
        let err = Server::start(cfg, AuthToken::generate(), Box::new(RecordingTarget::phone())).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_invalid_config_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.profile = "frantic".into();
        let target = RecordingTarget::phone();
        let recording = target.recording();
        assert!(Server::start(cfg, AuthToken::generate(), Box::new(target)).is_err());
        assert!(!recording.is_initialized());
        assert!(!dir.path().join("tg.sock").exists());
    }

    #[test]
    fn test_registry_cancel_closes_streams() {
        let registry = ConnectionRegistry::default();
        let (a, mut b) = UnixStream::pair().unwrap();
        let registration = registry.register(&a).unwrap();
        assert_eq!(registration.id(), 1);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.cancel_all(), 1);
        let mut buf = [0u8; 1];
        assert_eq!(std::io::Read::read(&mut b, &mut buf).unwrap(), 0);

        // Closed registries refuse newcomers.
        let (c, _d) = UnixStream::pair().unwrap();
        assert!(registry.register(&c).is_none());

        drop(registration);
        assert_eq!(registry.len(), 0);
    }
}
