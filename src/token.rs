//! Shared-secret management for socket authentication.
//!
//! This module handles:
//! - 32-byte token generation from the OS-seeded CSPRNG
//! - Owner-only persistence (0600) with no-clobber creation
//! - Loading for the server (fail-closed: never synthesizes a token)
//! - Constant-time comparison
//! - Rotation, which invalidates every existing client
//!
//! The token file holds the raw 32 bytes and nothing else. Tokens are only
//! ever logged or displayed as fingerprints.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::TOKEN_LEN;

/// File name used under the config directory.
const TOKEN_FILE_NAME: &str = "auth.token";

/// The 256-bit shared secret.
///
/// Zeroized on drop. `Debug` shows the fingerprint, never the bytes, and
/// `==` goes through the constant-time [`verify`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken([u8; TOKEN_LEN]);

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        verify(&self.0, &other.0)
    }
}

impl Eq for AuthToken {}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&self.fingerprint()).finish()
    }
}

impl AuthToken {
    /// Wrap raw token bytes.
    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    /// Constant-time comparison against a candidate presented by a peer.
    pub fn verify(&self, candidate: &[u8]) -> bool {
        verify(candidate, &self.0)
    }

    /// Human-readable fingerprint: first 8 bytes of SHA-256 as hex.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.0);
        hash[..8]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Compare two byte strings in time independent of where they differ.
///
/// Differing lengths return false without looking at the contents. For
/// equal lengths every byte pair is XORed into one accumulator, which is
/// compared to zero once at the end.
pub fn verify(candidate: &[u8], expected: &[u8]) -> bool {
    if candidate.len() != expected.len() {
        return false;
    }
    let mut acc = 0u8;
    for (a, b) in candidate.iter().zip(expected) {
        acc |= a ^ b;
    }
    std::hint::black_box(acc) == 0
}

/// Persisted token at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

/// Serializes create/regenerate within this process.
static TOKEN_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

impl TokenStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location.
    ///
    /// Directory selection priority:
    /// 1. `TOUCHGATE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (e.g. `~/.config/touchgate`)
    ///
    /// Only clients use this. The server always takes an explicit path.
    pub fn default_location() -> Result<Self> {
        let dir = if let Ok(dir) = std::env::var("TOUCHGATE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("touchgate")
        };
        Ok(Self::new(dir.join(TOKEN_FILE_NAME)))
    }

    /// Path of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the persisted token, creating one if none exists.
    ///
    /// Creation writes a private temp file and hard-links it into place, so
    /// a concurrent creator in another process either wins or adopts the
    /// winner's token; no reader ever sees a half-written file.
    pub fn get_or_create(&self) -> Result<AuthToken> {
        let _guard = TOKEN_LOCK.lock().map_err(|_| anyhow::anyhow!("token lock poisoned"))?;

        if self.path.exists() {
            return Self::load(&self.path)
                .with_context(|| format!("Token file is unreadable or invalid: {}", self.path.display()));
        }
        self.create()
    }

    /// Delete the persisted token and create a new one.
    ///
    /// Every client holding the old token is locked out.
    pub fn regenerate(&self) -> Result<AuthToken> {
        let _guard = TOKEN_LOCK.lock().map_err(|_| anyhow::anyhow!("token lock poisoned"))?;

        match fs::remove_file(&self.path) {
            Ok(()) => log::info!("[token] Removed old token at {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove token: {}", self.path.display()))
            }
        }
        self.create()
    }

    /// Load a token for the server.
    ///
    /// Returns `None` when the file is missing, unreadable, or not exactly
    /// 32 bytes. The caller must refuse to start in that case.
    pub fn load(path: &Path) -> Option<AuthToken> {
        let mut bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[token] Cannot read {}: {e}", path.display());
                return None;
            }
        };

        let token = match <[u8; TOKEN_LEN]>::try_from(bytes.as_slice()) {
            Ok(raw) => Some(AuthToken(raw)),
            Err(_) => {
                log::error!(
                    "[token] {} holds {} bytes, expected {TOKEN_LEN}",
                    path.display(),
                    bytes.len()
                );
                None
            }
        };
        bytes.zeroize();

        #[cfg(unix)]
        if token.is_some() {
            if let Ok(meta) = fs::metadata(path) {
                if meta.permissions().mode() & 0o077 != 0 {
                    log::warn!(
                        "[token] {} is accessible by group/others (mode {:o})",
                        path.display(),
                        meta.permissions().mode() & 0o777
                    );
                }
            }
        }

        token
    }

    fn create(&self) -> Result<AuthToken> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create token directory: {}", parent.display()))?;

        let token = AuthToken::generate();
        let tmp_path = parent.join(format!(
            ".{TOKEN_FILE_NAME}.{}.{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let _cleanup = scopeguard::guard(tmp_path.clone(), |p| {
            let _ = fs::remove_file(p);
        });

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&tmp_path)
            .with_context(|| format!("Failed to create temp token file: {}", tmp_path.display()))?;
        file.write_all(token.as_bytes())
            .and_then(|()| file.sync_all())
            .context("Failed to write token")?;
        drop(file);

        match fs::hard_link(&tmp_path, &self.path) {
            Ok(()) => {
                log::info!(
                    "[token] Created new token at {}: fingerprint={}",
                    self.path.display(),
                    token.fingerprint()
                );
                Ok(token)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Another process won the race; adopt its token.
                log::info!("[token] Token created concurrently, loading existing");
                Self::load(&self.path)
                    .with_context(|| format!("Token file is unreadable or invalid: {}", self.path.display()))
            }
            Err(e) => Err(e).with_context(|| format!("Failed to install token: {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_equal_and_unequal() {
        let a = [5u8; 32];
        let mut b = a;
        assert!(verify(&a, &b));

        b[31] ^= 1;
        assert!(!verify(&a, &b));

        b = a;
        b[0] ^= 0x80;
        assert!(!verify(&a, &b));
    }

    #[test]
    fn test_verify_length_mismatch() {
        assert!(!verify(&[1, 2, 3], &[1, 2, 3, 4]));
        assert!(!verify(&[], &[0]));
        assert!(verify(&[], &[]));
    }

    #[test]
    fn test_token_equality_matches_verify() {
        let token = AuthToken::from_bytes([7u8; 32]);
        assert_eq!(token, AuthToken::from_bytes([7u8; 32]));

        let mut last = [7u8; 32];
        last[31] = 8;
        assert_ne!(token, AuthToken::from_bytes(last));
        let mut first = [7u8; 32];
        first[0] = 8;
        assert_ne!(token, AuthToken::from_bytes(first));
        assert!(token.verify(AuthToken::from_bytes([7u8; 32]).as_bytes()));
    }

    #[test]
    fn test_get_or_create_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("sub/auth.token"));

        let first = store.get_or_create().unwrap();
        let second = store.get_or_create().unwrap();
        assert_eq!(first, second);

        let on_disk = fs::read(store.path()).unwrap();
        assert_eq!(on_disk.as_slice(), first.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_is_owner_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("auth.token"));
        store.get_or_create().unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("auth.token"));
        store.get_or_create().unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_regenerate_changes_token() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TokenStore::new(tmp.path().join("auth.token"));

        let old = store.get_or_create().unwrap();
        let new = store.regenerate().unwrap();
        assert_ne!(old, new);
        assert_eq!(TokenStore::load(store.path()), Some(new));
    }

    #[test]
    fn test_load_missing_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(TokenStore::load(&tmp.path().join("nope")).is_none());
    }

    #[test]
    fn test_load_wrong_length_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("auth.token");
        fs::write(&path, [1u8; 31]).unwrap();
        assert!(TokenStore::load(&path).is_none());

        fs::write(&path, [1u8; 33]).unwrap();
        assert!(TokenStore::load(&path).is_none());
    }

    #[test]
    fn test_get_or_create_rejects_corrupt_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("auth.token");
        fs::write(&path, b"short").unwrap();
        let store = TokenStore::new(&path);
        assert!(store.get_or_create().is_err());
        // The corrupt file is left for the operator; only regenerate replaces it.
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_fingerprint_format() {
        let token = AuthToken::generate();
        let fingerprint = token.fingerprint();

        // Should be 8 hex bytes separated by colons
        let parts: Vec<&str> = fingerprint.split(':').collect();
        assert_eq!(parts.len(), 8);
        for part in parts {
            assert_eq!(part.len(), 2);
            assert!(part.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = AuthToken::from_bytes([0xab; 32]);
        let debug = format!("{token:?}");
        assert!(!debug.contains("171")); // 0xab
        assert!(!debug.to_lowercase().contains("abab"));
        assert!(debug.contains(&token.fingerprint()));
    }
}
