//! Control Endpoint Resolution
//!
//! Derives the one control-channel address this user should use and makes it
//! connectable.
//!
//! # Endpoint Location
//!
//! - Domain-socket platforms: `<user-config-dir>/valvefm/ctl.sock`
//! - Everything else: an ephemeral loopback port, published as `host:port`
//!   in `<user-config-dir>/valvefm/ctl.addr`
//!
//! # Security
//!
//! - Socket and address file are owner-only (mode 0600)
//! - Peer UID validated via `SO_PEERCRED` / `getpeereid` on unix
//! - No network exposure (loopback only)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   resolve()    ┌──────────────────┐
//! │  valvefm client  ├───────────────►│     Endpoint     │
//! └──────────────────┘                │ transport + addr │
//!                                     └────────▲─────────┘
//! ┌──────────────────┐   listen()              │
//! │  ControlServer   ├──────────────► ControlListener
//! └──────────────────┘   cleanup()  (removes socket / address file)
//! ```

mod loopback;
#[cfg(unix)]
mod unix;

pub use loopback::LoopbackResolver;
#[cfg(unix)]
pub use unix::UnixSocketResolver;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Directory name under the user's config directory
pub const APP_DIR_NAME: &str = "valvefm";

/// File name of the domain socket
pub const SOCKET_FILE_NAME: &str = "ctl.sock";

/// File name holding the loopback `host:port`
pub const ADDRESS_FILE_NAME: &str = "ctl.addr";

/// Errors raised while bringing up or resolving the control endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The user's config directory could not be determined
    #[error("cannot determine control directory: {0}")]
    Resolution(String),

    /// Binding the listener failed (usually another instance holds it)
    #[error("failed to bind control endpoint {address}: {source}")]
    Bind {
        /// Address that could not be bound
        address: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The loopback address file is missing or empty
    #[error("control address unavailable at {path}: {reason}")]
    AddressUnavailable {
        /// Path of the address file
        path: PathBuf,
        /// Why it could not be used
        reason: String,
    },

    /// Filesystem work around the endpoint artifact failed
    #[error("control endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport used by an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Unix domain socket; the address is a filesystem path
    UnixDomain,
    /// Loopback TCP; the address is `host:port`
    LoopbackTcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnixDomain => write!(f, "unix"),
            Self::LoopbackTcp => write!(f, "tcp"),
        }
    }
}

/// A resolved control-channel address
///
/// Immutable once resolved; created by an [`EndpointResolver`] and consumed
/// by the server and by clients.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    transport: Transport,
    address: String,
}

impl Endpoint {
    /// Create an endpoint from its parts
    pub fn new(transport: Transport, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
        }
    }

    /// Transport of this endpoint
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Socket path or `host:port`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open a client stream to this endpoint
    pub async fn connect(&self) -> std::io::Result<Box<dyn ControlConnection>> {
        match self.transport {
            #[cfg(unix)]
            Transport::UnixDomain => {
                let stream = UnixStream::connect(&self.address).await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Transport::UnixDomain => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            )),
            Transport::LoopbackTcp => {
                let stream = TcpStream::connect(&self.address).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.address)
    }
}

/// A bidirectional byte stream carrying the control protocol
pub trait ControlConnection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ControlConnection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A bound control listener
pub enum ControlListener {
    /// Domain-socket listener
    #[cfg(unix)]
    Unix(UnixListener),
    /// Loopback TCP listener
    Tcp(TcpListener),
}

impl ControlListener {
    /// Accept the next connection
    ///
    /// On unix, connections from a different user are refused with
    /// `PermissionDenied`; the accept loop treats that like any other benign
    /// accept error.
    pub async fn accept(&self) -> std::io::Result<Box<dyn ControlConnection>> {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                validate_peer(&stream)?;
                Ok(Box::new(stream))
            }
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                if !addr.ip().is_loopback() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("rejecting non-loopback peer {addr}"),
                    ));
                }
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Reject connections from other users (root is allowed)
#[cfg(unix)]
fn validate_peer(stream: &UnixStream) -> std::io::Result<()> {
    let cred = stream.peer_cred()?;
    // SAFETY: getuid has no preconditions and cannot fail.
    let my_uid = unsafe { libc::getuid() };

    if cred.uid() != my_uid && cred.uid() != 0 {
        tracing::warn!(
            peer_uid = cred.uid(),
            my_uid = my_uid,
            "Rejecting connection from different user"
        );
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("peer UID {} does not match server UID {}", cred.uid(), my_uid),
        ));
    }

    tracing::debug!(peer_uid = cred.uid(), peer_pid = ?cred.pid(), "Peer validated");
    Ok(())
}

/// Capability for deriving, binding and cleaning up the control endpoint
///
/// Two implementations exist: [`UnixSocketResolver`] (unix) and
/// [`LoopbackResolver`]. Use [`platform_resolver`] to pick one for the
/// current target.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Recompute the endpoint a client should connect to
    fn resolve(&self) -> Result<Endpoint, EndpointError>;

    /// Bind the endpoint for serving
    async fn listen(&self) -> Result<(ControlListener, Endpoint), EndpointError>;

    /// Remove the endpoint's on-disk artifact
    ///
    /// Safe to call when the artifact is already gone.
    fn cleanup(&self, endpoint: &Endpoint) -> Result<(), EndpointError>;
}

/// Default control directory: `<user-config-dir>/valvefm`
pub fn default_control_dir() -> Result<PathBuf, EndpointError> {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .ok_or_else(|| EndpointError::Resolution("user config directory is not set".to_string()))
}

/// The resolver for this platform, rooted at `control_dir`
#[cfg(unix)]
pub fn platform_resolver(control_dir: PathBuf) -> Arc<dyn EndpointResolver> {
    Arc::new(UnixSocketResolver::new(control_dir))
}

/// The resolver for this platform, rooted at `control_dir`
#[cfg(not(unix))]
pub fn platform_resolver(control_dir: PathBuf) -> Arc<dyn EndpointResolver> {
    Arc::new(LoopbackResolver::new(control_dir))
}

/// Create `dir` (and parents) if it does not exist yet
fn ensure_dir(dir: &std::path::Path) -> Result<(), EndpointError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            EndpointError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create directory {}: {e}", dir.display()),
            ))
        })?;
        tracing::info!(path = ?dir, "Created control directory");
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success
fn remove_if_present(path: &std::path::Path) -> Result<(), EndpointError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = ?path, "Removed endpoint artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EndpointError::Io(e)),
    }
}
