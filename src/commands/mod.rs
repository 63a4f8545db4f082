//! CLI subcommand implementations for touchgate.
//!
//! Commands are organized into submodules by role:
//!
//! - [`serve`] - Run the injection server
//! - [`token`] - Inspect and rotate the shared token
//! - [`probe`] - Check that an input device can be driven
//! - [`client`] - One-shot client requests against a running server
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use touchgate::commands;
//!
//! commands::serve::run(config)?;
//! commands::token::show(&store)?;
//! ```

pub mod client;
pub mod probe;
pub mod serve;
pub mod token;
