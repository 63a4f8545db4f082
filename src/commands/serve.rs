//! `touchgate serve`: run the injection server until shut down.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::device::{InjectionTarget, RecordingTarget};
use crate::socket::server::Server;
use crate::token::{AuthToken, TokenStore};

/// Load the token, open the device, serve until a signal or a `Shutdown`
/// command.
///
/// # Errors
///
/// Fails without starting anything when the token is missing or invalid,
/// the device can't be opened, or the socket can't be bound.
pub fn run(config: ServerConfig) -> Result<()> {
    let token = load_token(config.token_path.as_deref())?;
    let target = build_target(&config)?;

    let server = Server::start(config, token, target)?;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    let shutdown = server.shutdown_flag();
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGHUP, Arc::clone(&shutdown))?;

    let info = server.device_info();
    println!(
        "touchgate listening on {} ({} {}x{})",
        server.endpoint(),
        info.device_path,
        info.screen_width,
        info.screen_height
    );

    server.wait()
}

/// Load the server's token from an explicit path.
///
/// The server never creates a token and never falls back to a default
/// location.
pub fn load_token(path: Option<&Path>) -> Result<AuthToken> {
    let Some(path) = path else {
        bail!("No token file given. Pass --token-file or set TOUCHGATE_TOKEN_FILE.");
    };
    let token = TokenStore::load(path).with_context(|| {
        format!(
            "No valid token at {}. Create one with `touchgate token show --token-file {}`.",
            path.display(),
            path.display()
        )
    })?;
    log::info!("[token] loaded token {}", token.fingerprint());
    Ok(token)
}

fn build_target(config: &ServerConfig) -> Result<Box<dyn InjectionTarget>> {
    if config.dry_run {
        log::warn!("[server] dry run: events are logged, not injected");
        return Ok(Box::new(dry_run_target(config)));
    }
    evdev_target(config)
}

/// A dry run may serve indefinitely, so it keeps counts only.
fn dry_run_target(config: &ServerConfig) -> RecordingTarget {
    let (width, height) = config.screen_size.unwrap_or((1080, 2400));
    RecordingTarget::for_screen(width, height).with_history(0)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn evdev_target(config: &ServerConfig) -> Result<Box<dyn InjectionTarget>> {
    let interval = std::time::Duration::from_millis(config.humanizer_config()?.event_interval_ms);
    Ok(Box::new(crate::device::EvdevTarget::new(
        config.device.clone(),
        config.screen_size,
        interval,
    )))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn evdev_target(_config: &ServerConfig) -> Result<Box<dyn InjectionTarget>> {
    bail!("Raw input injection needs Linux or Android; use --dry-run on this platform")
}
