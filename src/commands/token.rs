//! `touchgate token`: manage the shared secret.
//!
//! Only fingerprints are ever printed. Clients read the token file
//! directly.

use anyhow::Result;

use crate::token::TokenStore;

/// Print the token's fingerprint and location, creating it on first use.
pub fn show(store: &TokenStore) -> Result<()> {
    let token = store.get_or_create()?;
    println!("{}  {}", token.fingerprint(), store.path().display());
    Ok(())
}

/// Print the token file path.
pub fn path(store: &TokenStore) {
    println!("{}", store.path().display());
}

/// Replace the token. Every existing client must re-read it.
pub fn regenerate(store: &TokenStore) -> Result<()> {
    let token = store.regenerate()?;
    log::info!("[token] regenerated, new fingerprint {}", token.fingerprint());
    println!("{}  {}", token.fingerprint(), store.path().display());
    println!("Restart the server and any clients to pick up the new token.");
    Ok(())
}
