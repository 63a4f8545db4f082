//! Server configuration.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. An explicit JSON file (`serve --config <file>`)
//! 3. `TOUCHGATE_*` environment variables
//! 4. Command-line flags (applied by `main`)
//!
//! No config file is ever discovered implicitly: the server's inputs,
//! the token path above all, are always named by whoever launches it.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CORE_WORKERS, DEFAULT_MAX_WORKERS, DEFAULT_QUEUE_CAPACITY, MAX_AUTH_ATTEMPTS, READ_TIMEOUT,
    SHUTDOWN_GRACE, WORKER_KEEP_ALIVE,
};
use crate::humanize::HumanizerConfig;
use crate::socket::pool::PoolConfig;
use crate::socket::Endpoint;

/// Default socket file name under the runtime directory.
const SOCKET_FILE_NAME: &str = "touchgate.sock";

/// Element size assumed for taps that don't name one, in pixels.
const DEFAULT_ELEMENT_SIZE: f64 = 48.0;

/// Configuration for `touchgate serve`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket path, or `@name` for an abstract socket.
    pub socket: String,
    /// Token file the server loads. Required to start.
    pub token_path: Option<PathBuf>,
    /// Input device node; probed when unset.
    pub device: Option<PathBuf>,
    /// Screen size `[width, height]` when it differs from the axis range.
    pub screen_size: Option<(i32, i32)>,
    /// Per-connection read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Failed `Auth` commands tolerated per connection.
    pub max_auth_attempts: u32,
    /// Worker threads kept alive.
    pub core_workers: usize,
    /// Upper bound on worker threads.
    pub max_workers: usize,
    /// Connections waiting for a worker.
    pub queue_capacity: usize,
    /// Idle time before an extra worker exits, in milliseconds.
    pub worker_keep_alive_ms: u64,
    /// Grace period for each shutdown stage, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Humanizer profile name.
    pub profile: String,
    /// Explicit humanizer parameters, used instead of `profile`. Fields
    /// left out take the default profile's values.
    pub humanizer: Option<HumanizerConfig>,
    /// Sleep pre/post-action delays around humanized gestures.
    pub humanize_delays: bool,
    /// Element size used for humanized tap jitter, in pixels.
    pub default_element_size: f64,
    /// Record events instead of writing to a device.
    pub dry_run: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: default_socket_path().to_string_lossy().into_owned(),
            token_path: None,
            device: None,
            screen_size: None,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
            max_auth_attempts: MAX_AUTH_ATTEMPTS,
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_keep_alive_ms: WORKER_KEEP_ALIVE.as_millis() as u64,
            shutdown_grace_ms: SHUTDOWN_GRACE.as_millis() as u64,
            profile: "default".to_string(),
            humanizer: None,
            humanize_delays: true,
            default_element_size: DEFAULT_ELEMENT_SIZE,
            dry_run: false,
        }
    }
}

/// Socket path used when none is configured.
///
/// The per-user runtime directory when the platform has one, otherwise the
/// system temp directory.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_FILE_NAME)
}

impl ServerConfig {
    /// Defaults, overlaid with `file` when given, then with the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `TOUCHGATE_*` overrides looked up through `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup("TOUCHGATE_SOCKET") {
            self.socket = socket;
        }
        if let Some(token) = lookup("TOUCHGATE_TOKEN_FILE") {
            self.token_path = Some(PathBuf::from(token));
        }
        if let Some(device) = lookup("TOUCHGATE_DEVICE") {
            self.device = Some(PathBuf::from(device));
        }
        if let Some(secs) = lookup("TOUCHGATE_READ_TIMEOUT") {
            match secs.parse::<u64>() {
                Ok(secs) => self.read_timeout_ms = secs.saturating_mul(1000),
                Err(_) => log::warn!("Ignoring invalid TOUCHGATE_READ_TIMEOUT: {secs}"),
            }
        }
        if let Some(attempts) = lookup("TOUCHGATE_MAX_AUTH_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(attempts) => self.max_auth_attempts = attempts,
                Err(_) => log::warn!("Ignoring invalid TOUCHGATE_MAX_AUTH_ATTEMPTS: {attempts}"),
            }
        }
        if let Some(profile) = lookup("TOUCHGATE_PROFILE") {
            self.profile = profile;
        }
    }

    /// Reject settings the server can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.socket.is_empty() || self.socket == "@" {
            bail!("Socket address is empty");
        }
        if self.read_timeout_ms == 0 {
            bail!("Read timeout must be positive");
        }
        if self.max_auth_attempts == 0 {
            bail!("max_auth_attempts must be at least 1");
        }
        if !(self.default_element_size.is_finite() && self.default_element_size >= 0.0) {
            bail!("default_element_size must be a non-negative number");
        }
        if let Some((w, h)) = self.screen_size {
            if w <= 0 || h <= 0 {
                bail!("Screen size must be positive, got {w}x{h}");
            }
        }
        self.humanizer_config()?;
        Ok(())
    }

    /// Parsed socket address.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&self.socket)
    }

    /// Humanizer parameters: the `humanizer` table when present, otherwise
    /// the named profile.
    pub fn humanizer_config(&self) -> Result<HumanizerConfig> {
        if let Some(humanizer) = &self.humanizer {
            return Ok(humanizer.clone());
        }
        HumanizerConfig::by_name(&self.profile).with_context(|| {
            format!(
                "Unknown humanizer profile '{}' (expected one of: {})",
                self.profile,
                HumanizerConfig::PROFILE_NAMES.join(", ")
            )
        })
    }

    /// Worker pool sizing.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            core_workers: self.core_workers,
            max_workers: self.max_workers,
            queue_capacity: self.queue_capacity,
            keep_alive: Duration::from_millis(self.worker_keep_alive_ms),
        }
    }

    /// Per-connection read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Grace period for each shutdown stage.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_auth_attempts, 3);
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert!(config.socket.ends_with("touchgate.sock"));
        assert!(config.token_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup(&[
            ("TOUCHGATE_SOCKET", "@touchgate"),
            ("TOUCHGATE_TOKEN_FILE", "/data/local/tmp/auth.token"),
            ("TOUCHGATE_DEVICE", "/dev/input/event2"),
            ("TOUCHGATE_READ_TIMEOUT", "5"),
            ("TOUCHGATE_MAX_AUTH_ATTEMPTS", "5"),
            ("TOUCHGATE_PROFILE", "brisk"),
        ]));
        assert_eq!(config.endpoint(), Endpoint::Abstract("touchgate".into()));
        assert_eq!(config.token_path, Some(PathBuf::from("/data/local/tmp/auth.token")));
        assert_eq!(config.device, Some(PathBuf::from("/dev/input/event2")));
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_auth_attempts, 5);
        assert_eq!(config.humanizer_config().unwrap(), HumanizerConfig::brisk());
    }

    #[test]
    fn test_invalid_numeric_env_is_ignored() {
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup(&[
            ("TOUCHGATE_READ_TIMEOUT", "soon"),
            ("TOUCHGATE_MAX_AUTH_ATTEMPTS", "-1"),
        ]));
        assert_eq!(config.read_timeout_ms, 30_000);
        assert_eq!(config.max_auth_attempts, 3);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("touchgate.json");
        fs::write(
            &path,
            r#"{"socket": "/tmp/tg.sock", "screen_size": [1080, 2400], "humanize_delays": false}"#,
        )
        .unwrap();

        let config = ServerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.socket, "/tmp/tg.sock");
        assert_eq!(config.screen_size, Some((1080, 2400)));
        assert!(!config.humanize_delays);
        assert_eq!(config.profile, "default");
    }

    #[test]
    fn test_humanizer_table_overrides_profile() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("touchgate.json");
        fs::write(
            &path,
            r#"{
                "profile": "brisk",
                "humanizer": {
                    "event_interval_ms": 12,
                    "pre_action_delay": {"mode_ms": 50.0, "sigma": 0.2, "min_ms": 20.0, "max_ms": 90.0}
                }
            }"#,
        )
        .unwrap();

        let config = ServerConfig::load_from_file(&path).unwrap();
        config.validate().unwrap();
        let humanizer = config.humanizer_config().unwrap();
        assert_eq!(humanizer.event_interval_ms, 12);
        assert_eq!(humanizer.pre_action_delay.max_ms, 90.0);
        assert_eq!(humanizer.jitter_sigma_factor, HumanizerConfig::default().jitter_sigma_factor);
        assert_ne!(humanizer, HumanizerConfig::brisk());
    }

    #[test]
    fn test_missing_or_broken_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ServerConfig::load_from_file(&dir.path().join("absent.json")).is_err());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{not json").unwrap();
        let err = ServerConfig::load_from_file(&broken).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config file"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ServerConfig { read_timeout_ms: 0, ..ServerConfig::default() },
            ServerConfig { max_auth_attempts: 0, ..ServerConfig::default() },
            ServerConfig { screen_size: Some((0, 100)), ..ServerConfig::default() },
            ServerConfig { profile: "frantic".into(), ..ServerConfig::default() },
            ServerConfig { socket: "@".into(), ..ServerConfig::default() },
            ServerConfig { default_element_size: f64::NAN, ..ServerConfig::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
