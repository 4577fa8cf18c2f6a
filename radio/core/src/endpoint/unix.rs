//! Unix domain socket endpoint
//!
//! The socket lives at a fixed path, so clients never need discovery: they
//! recompute the same path the server bound.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};

use super::{
    ensure_dir, remove_if_present, ControlListener, Endpoint, EndpointError, EndpointResolver,
    Transport, SOCKET_FILE_NAME,
};

/// Resolver for `<control_dir>/ctl.sock`
#[derive(Clone, Debug)]
pub struct UnixSocketResolver {
    socket_path: PathBuf,
}

impl UnixSocketResolver {
    /// Create a resolver rooted at `control_dir`
    pub fn new(control_dir: PathBuf) -> Self {
        Self {
            socket_path: control_dir.join(SOCKET_FILE_NAME),
        }
    }

    /// Path of the socket file
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Remove a socket left behind by an unclean shutdown
    ///
    /// A socket that still accepts connections belongs to a live instance
    /// and is left alone.
    async fn clear_stale_socket(&self) -> Result<(), EndpointError> {
        if !self.socket_path.exists() {
            return Ok(());
        }

        if UnixStream::connect(&self.socket_path).await.is_ok() {
            return Err(EndpointError::Bind {
                address: self.socket_path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "another instance is listening on this socket",
                ),
            });
        }

        tracing::warn!(path = ?self.socket_path, "Removing stale socket file");
        remove_if_present(&self.socket_path)
    }

    /// Set socket permissions to 0600 (owner-only)
    fn set_socket_permissions(&self) -> Result<(), EndpointError> {
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, perms)?;
        Ok(())
    }
}

#[async_trait]
impl EndpointResolver for UnixSocketResolver {
    fn resolve(&self) -> Result<Endpoint, EndpointError> {
        Ok(Endpoint::new(
            Transport::UnixDomain,
            self.socket_path.to_string_lossy(),
        ))
    }

    async fn listen(&self) -> Result<(ControlListener, Endpoint), EndpointError> {
        if let Some(parent) = self.socket_path.parent() {
            ensure_dir(parent)?;
        }

        self.clear_stale_socket().await?;

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| EndpointError::Bind {
            address: self.socket_path.display().to_string(),
            source: e,
        })?;

        self.set_socket_permissions()?;

        tracing::info!(path = ?self.socket_path, "Control server listening on Unix socket");
        Ok((ControlListener::Unix(listener), self.resolve()?))
    }

    fn cleanup(&self, endpoint: &Endpoint) -> Result<(), EndpointError> {
        if endpoint.address().is_empty() {
            return Ok(());
        }
        remove_if_present(Path::new(endpoint.address()))
    }
}
