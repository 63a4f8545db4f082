//! Touchgate CLI - serve touch injection over a local socket, or talk to
//! a running server.
//!
//! See the `touchgate` library for the core functionality.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use touchgate::commands;
use touchgate::commands::client::{Request, Target};
use touchgate::{ServerConfig, TokenStore};

#[derive(Parser)]
#[command(name = "touchgate")]
#[command(version)]
#[command(about = "Authenticated local daemon that injects humanized touch gestures")]
struct Cli {
    /// Append logs to this file instead of stderr (or TOUCHGATE_LOG_FILE)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct ClientArgs {
    /// Socket path, or @name for an abstract socket
    #[arg(long)]
    socket: Option<String>,
    /// Token file to authenticate with
    #[arg(long)]
    token_file: Option<PathBuf>,
}

impl From<ClientArgs> for Target {
    fn from(args: ClientArgs) -> Self {
        Target {
            socket: args.socket,
            token_file: args.token_file,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the injection server
    Serve {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Socket path, or @name for an abstract socket
        #[arg(long)]
        socket: Option<String>,
        /// Token file (must already exist)
        #[arg(long)]
        token_file: Option<PathBuf>,
        /// Input device node; probed when omitted
        #[arg(long)]
        device: Option<PathBuf>,
        /// Screen size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_screen)]
        screen: Option<(i32, i32)>,
        /// Humanizer profile (default, brisk, deliberate)
        #[arg(long)]
        profile: Option<String>,
        /// Skip pre/post-action delays around humanized gestures
        #[arg(long)]
        no_delays: bool,
        /// Record events instead of writing to a device
        #[arg(long)]
        dry_run: bool,
        /// Failed authentications tolerated per connection
        #[arg(long)]
        max_auth_attempts: Option<u32>,
        /// Per-connection read timeout in seconds
        #[arg(long)]
        read_timeout: Option<u64>,
    },
    /// Manage the shared token
    Token {
        /// Token file (defaults to the config directory)
        #[arg(long, global = true)]
        token_file: Option<PathBuf>,

        #[command(subcommand)]
        action: TokenAction,
    },
    /// Open the input device and print its capabilities
    Probe {
        /// Input device node; probed when omitted
        #[arg(long)]
        device: Option<PathBuf>,
        /// Screen size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_screen)]
        screen: Option<(i32, i32)>,
        /// Tap once at device coordinates X,Y
        #[arg(long, value_parser = parse_point)]
        tap: Option<(i32, i32)>,
    },
    /// Check that the server answers
    Ping {
        #[command(flatten)]
        target: ClientArgs,
    },
    /// Humanized tap at screen coordinates
    Tap {
        x: i32,
        y: i32,
        #[command(flatten)]
        target: ClientArgs,
    },
    /// Humanized swipe through two or more points
    Swipe {
        /// Path point as X,Y (repeat for each point)
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<(i32, i32)>,
        /// Swipe duration in milliseconds
        #[arg(long, default_value_t = 300)]
        duration: i64,
        #[command(flatten)]
        target: ClientArgs,
    },
    /// Send text input
    Text {
        text: String,
        #[command(flatten)]
        target: ClientArgs,
    },
    /// Print the server's device description
    Info {
        #[command(flatten)]
        target: ClientArgs,
    },
    /// Ask the server to shut down
    Shutdown {
        #[command(flatten)]
        target: ClientArgs,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Print the token fingerprint and path, creating the token if needed
    Show,
    /// Print the token file path
    Path,
    /// Replace the token with a fresh one
    Regenerate,
}

/// Parse `WIDTHxHEIGHT`.
fn parse_screen(value: &str) -> Result<(i32, i32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let w: i32 = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
    let h: i32 = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
    if w <= 0 || h <= 0 {
        return Err(format!("screen size must be positive, got {w}x{h}"));
    }
    Ok((w, h))
}

/// Parse `X,Y`.
fn parse_point(value: &str) -> Result<(i32, i32), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{value}'"))?;
    let x: i32 = x.trim().parse().map_err(|_| format!("invalid x '{x}'"))?;
    let y: i32 = y.trim().parse().map_err(|_| format!("invalid y '{y}'"))?;
    Ok((x, y))
}

fn init_logging(log_file: Option<PathBuf>) -> Result<()> {
    let log_path = log_file.or_else(|| std::env::var("TOUCHGATE_LOG_FILE").ok().map(PathBuf::from));

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = log_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }
    builder.init();
    Ok(())
}

fn token_store(token_file: Option<PathBuf>) -> Result<TokenStore> {
    match token_file.or_else(|| std::env::var("TOUCHGATE_TOKEN_FILE").ok().map(PathBuf::from)) {
        Some(path) => Ok(TokenStore::new(path)),
        None => TokenStore::default_location(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file)?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    match cli.command {
        Commands::Serve {
            config,
            socket,
            token_file,
            device,
            screen,
            profile,
            no_delays,
            dry_run,
            max_auth_attempts,
            read_timeout,
        } => {
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(socket) = socket {
                config.socket = socket;
            }
            if token_file.is_some() {
                config.token_path = token_file;
            }
            if device.is_some() {
                config.device = device;
            }
            if screen.is_some() {
                config.screen_size = screen;
            }
            if let Some(profile) = profile {
                config.profile = profile;
            }
            if no_delays {
                config.humanize_delays = false;
            }
            if dry_run {
                config.dry_run = true;
            }
            if let Some(attempts) = max_auth_attempts {
                config.max_auth_attempts = attempts;
            }
            if let Some(secs) = read_timeout {
                if secs == 0 {
                    bail!("--read-timeout must be positive");
                }
                config.read_timeout_ms = secs.saturating_mul(1000);
            }
            commands::serve::run(config)?;
        }
        Commands::Token { token_file, action } => {
            let store = token_store(token_file)?;
            match action {
                TokenAction::Show => commands::token::show(&store)?,
                TokenAction::Path => commands::token::path(&store),
                TokenAction::Regenerate => commands::token::regenerate(&store)?,
            }
        }
        Commands::Probe { device, screen, tap } => {
            commands::probe::run(device, screen, tap)?;
        }
        Commands::Ping { target } => {
            commands::client::run(&target.into(), Request::Ping)?;
        }
        Commands::Tap { x, y, target } => {
            commands::client::run(&target.into(), Request::Tap { x, y })?;
        }
        Commands::Swipe {
            points,
            duration,
            target,
        } => {
            commands::client::run(
                &target.into(),
                Request::Swipe {
                    points,
                    duration_ms: duration,
                },
            )?;
        }
        Commands::Text { text, target } => {
            commands::client::run(&target.into(), Request::Text(text))?;
        }
        Commands::Info { target } => {
            commands::client::run(&target.into(), Request::Info)?;
        }
        Commands::Shutdown { target } => {
            commands::client::run(&target.into(), Request::Shutdown)?;
        }
    }

    Ok(())
}
