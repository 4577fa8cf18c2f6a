//! valvefm - headless radio player instance and its control client
//!
//! # Usage
//!
//! ```bash
//! # Run the player, optionally starting a stream
//! valvefm serve http://radio.example/stream
//!
//! # Drive the running instance
//! valvefm play http://radio.example/other
//! valvefm toggle
//! valvefm status
//!
//! # Send a raw protocol line
//! valvefm send last
//!
//! # Verbose logging
//! RUST_LOG=debug valvefm serve
//! ```
//!
//! # Files
//!
//! - Endpoint: `<user-config-dir>/valvefm/ctl.sock` (or `ctl.addr`)
//! - Config: `<user-config-dir>/valvefm/config.toml`
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: stop playback and close the control server

mod instance;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use valvefm_core::config::default_config_path;
use valvefm_core::{
    default_control_dir, load_config_from_path, platform_resolver, BackendKind, ConfigOverrides,
    ControlClient, EndpointResolver, Reply, ValvefmConfig,
};

/// valvefm - terminal radio player with a local control channel
#[derive(Parser, Debug)]
#[command(name = "valvefm")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "VALVEFM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the control endpoint
    #[arg(long, global = true, env = "VALVEFM_CONTROL_DIR", value_name = "PATH")]
    control_dir: Option<PathBuf>,

    /// Log level or filter directives (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the player instance until interrupted
    Serve {
        /// Stream to start right away
        url: Option<String>,

        /// Preferred media backend (mpv or ffplay)
        #[arg(long, value_name = "NAME")]
        backend: Option<BackendKind>,

        /// Outstanding command limit
        #[arg(long, value_name = "N")]
        queue_capacity: Option<usize>,

        /// Request line deadline in milliseconds
        #[arg(long, value_name = "MS")]
        read_timeout_ms: Option<u64>,

        /// Reply wait bound in milliseconds
        #[arg(long, value_name = "MS")]
        reply_timeout_ms: Option<u64>,
    },
    /// Play a stream on the running instance
    Play {
        /// Stream URL
        url: String,
    },
    /// Stop playback
    Stop,
    /// Stop if playing, otherwise resume the last stream
    Toggle,
    /// Show what is playing
    Status,
    /// Check that an instance is running
    Ping,
    /// Send a raw request line
    Send {
        /// Verb followed by its argument
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
}

impl Command {
    /// Request line for client commands; `None` for `serve`
    fn request_line(&self) -> Option<String> {
        match self {
            Self::Serve { .. } => None,
            Self::Play { url } => Some(format!("PLAY {url}")),
            Self::Stop => Some("STOP".to_string()),
            Self::Toggle => Some("TOGGLE".to_string()),
            Self::Status => Some("STATUS".to_string()),
            Self::Ping => Some("PING".to_string()),
            Self::Send { words } => Some(words.join(" ")),
        }
    }
}

/// Initialize logging with the specified level
///
/// A bare level applies to both valvefm crates; anything else is taken as
/// filter directives.
fn init_logging(level: &str) -> Result<()> {
    let directives = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("valvefm={level},valvefm_core={level}")
    };
    let filter = tracing_subscriber::EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter: {directives}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn load_config(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<ValvefmConfig> {
    let path = path.or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    overrides
        .apply(&mut config)
        .context("Invalid command-line configuration")?;
    info!(source = %config.source(), path = ?config.config_file_path, "Configuration loaded");
    Ok(config)
}

/// Print `reply` and map it to an exit code
fn report(reply: &Reply) -> ExitCode {
    println!("{reply}");
    if reply.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_client(resolver: &dyn EndpointResolver, line: &str) -> Result<Reply> {
    let client = ControlClient::resolve(resolver).context("No running valvefm instance")?;
    client
        .send_line(line)
        .await
        .with_context(|| format!("Failed to reach valvefm at {}", client.endpoint()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    let control_dir = match args.control_dir {
        Some(dir) => dir,
        None => default_control_dir().context("Cannot locate the control directory")?,
    };
    let resolver: Arc<dyn EndpointResolver> = platform_resolver(control_dir);

    if let Some(line) = args.command.request_line() {
        let reply = run_client(resolver.as_ref(), &line).await?;
        return Ok(report(&reply));
    }

    let Command::Serve {
        url,
        backend,
        queue_capacity,
        read_timeout_ms,
        reply_timeout_ms,
    } = args.command
    else {
        return Ok(ExitCode::SUCCESS);
    };
    let overrides = ConfigOverrides {
        backend,
        queue_capacity,
        read_timeout_ms,
        reply_timeout_ms,
    };

    info!("valvefm starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = load_config(args.config, &overrides)?;

    match instance::serve(resolver, &config, url).await? {
        Some(reply) => Ok(report(&reply)),
        None => Ok(ExitCode::SUCCESS),
    }
}
