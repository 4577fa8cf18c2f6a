//! valvefm Core
//!
//! Everything a valvefm instance needs besides its command line:
//!
//! - [`supervisor`]: owns the single external player process (mpv or ffplay)
//! - [`endpoint`]: derives and binds the per-user control endpoint
//! - [`control`]: line protocol, bounded command queue, server and client
//! - [`config`]: TOML and environment configuration
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  line   ┌───────────────┐ try_submit ┌──────────────┐
//! │ ControlClient  ├────────►│ ControlServer ├───────────►│ CommandQueue │
//! └────────────────┘         └───────▲───────┘            └──────┬───────┘
//!                                    │ Reply (oneshot)           │
//!                                    │                   ┌───────▼──────┐
//!                                    └───────────────────┤  Dispatcher  │
//!                                                        └───────┬──────┘
//!                                                                │
//!                                                     ┌──────────▼─────────┐
//!                                                     │ PlaybackSupervisor │
//!                                                     └────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod endpoint;
pub mod supervisor;

pub use config::{
    load_config, load_config_from_path, ConfigError, ConfigOverrides, ConfigSource, ValvefmConfig,
};
pub use control::{
    command_queue, ClientError, ControlClient, ControlError, ControlServer, Dispatcher, Reply,
    Request, ServerConfig, Verb,
};
pub use endpoint::{
    default_control_dir, platform_resolver, Endpoint, EndpointError, EndpointResolver, Transport,
};
pub use supervisor::{
    Backend, BackendKind, BackendLocator, PlaybackStatus, PlaybackSupervisor, SupervisorError,
};
