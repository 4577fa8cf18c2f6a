//! Local Control Plane
//!
//! A second `valvefm` invocation (or any tool that can write a line to the
//! endpoint) drives the running instance through this module.
//!
//! - [`protocol`]: request/reply line format
//! - [`queue`]: bounded command queue with non-blocking admission
//! - [`server`]: accept loop and per-connection handling
//! - [`dispatch`]: the single consumer executing commands
//! - [`client`]: one-shot request/reply client
//!
//! # Error replies
//!
//! Every per-request failure becomes an `ERR <message>` line; none of them
//! stop the server or affect other connections.

pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod queue;
pub mod server;

pub use client::{ClientError, ControlClient, DEFAULT_CLIENT_TIMEOUT};
pub use dispatch::Dispatcher;
pub use protocol::{ProtocolError, Reply, Request, Verb, MAX_REQUEST_BYTES};
pub use queue::{command_queue, Command, CommandReceiver, CommandSender, DEFAULT_QUEUE_CAPACITY};
pub use server::{
    ConnectionId, ControlServer, ServerConfig, DEFAULT_READ_TIMEOUT, DEFAULT_REPLY_TIMEOUT,
};

use thiserror::Error;

/// Per-request failures, displayed exactly as they appear on the wire
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The request line was unusable
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The command queue is at capacity
    #[error("busy")]
    Busy,

    /// No reply arrived within the reply timeout
    #[error("timeout")]
    Timeout,

    /// The server is closing or the dispatcher is gone
    #[error("server shutting down")]
    ShuttingDown,
}

impl From<ControlError> for Reply {
    fn from(err: ControlError) -> Self {
        Reply::error(err.to_string())
    }
}
