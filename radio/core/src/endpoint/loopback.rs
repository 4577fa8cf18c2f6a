//! Loopback TCP endpoint
//!
//! Used where domain sockets are not usable. The port is ephemeral, so the
//! server publishes `host:port` in an owner-only address file and clients
//! read it back.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use super::{
    ensure_dir, remove_if_present, ControlListener, Endpoint, EndpointError, EndpointResolver,
    Transport, ADDRESS_FILE_NAME,
};

/// Address the loopback listener binds to
const LOOPBACK_BIND_ADDR: &str = "127.0.0.1:0";

/// Resolver for an ephemeral loopback port published in `<control_dir>/ctl.addr`
#[derive(Clone, Debug)]
pub struct LoopbackResolver {
    address_file: PathBuf,
}

impl LoopbackResolver {
    /// Create a resolver rooted at `control_dir`
    pub fn new(control_dir: PathBuf) -> Self {
        Self {
            address_file: control_dir.join(ADDRESS_FILE_NAME),
        }
    }

    /// Path of the address file
    pub fn address_file(&self) -> &Path {
        &self.address_file
    }

    fn write_address_file(&self, addr: &str) -> std::io::Result<()> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.address_file)?;
        file.write_all(addr.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl EndpointResolver for LoopbackResolver {
    fn resolve(&self) -> Result<Endpoint, EndpointError> {
        let data = std::fs::read_to_string(&self.address_file).map_err(|e| {
            EndpointError::AddressUnavailable {
                path: self.address_file.clone(),
                reason: e.to_string(),
            }
        })?;

        let addr = data.trim();
        if addr.is_empty() {
            return Err(EndpointError::AddressUnavailable {
                path: self.address_file.clone(),
                reason: "empty ipc address".to_string(),
            });
        }

        Ok(Endpoint::new(Transport::LoopbackTcp, addr))
    }

    async fn listen(&self) -> Result<(ControlListener, Endpoint), EndpointError> {
        if let Some(parent) = self.address_file.parent() {
            ensure_dir(parent)?;
        }

        // A published address that still answers belongs to a live instance
        if let Ok(existing) = self.resolve() {
            if TcpStream::connect(existing.address()).await.is_ok() {
                return Err(EndpointError::Bind {
                    address: existing.address().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "another instance is listening on this address",
                    ),
                });
            }
            tracing::warn!(path = ?self.address_file, "Replacing stale address file");
        }

        let listener = TcpListener::bind(LOOPBACK_BIND_ADDR)
            .await
            .map_err(|e| EndpointError::Bind {
                address: LOOPBACK_BIND_ADDR.to_string(),
                source: e,
            })?;

        let addr = listener.local_addr()?.to_string();
        // On failure the listener is dropped here, closing the port
        self.write_address_file(&addr)?;

        tracing::info!(addr = %addr, path = ?self.address_file, "Control server listening on loopback");
        Ok((
            ControlListener::Tcp(listener),
            Endpoint::new(Transport::LoopbackTcp, addr),
        ))
    }

    fn cleanup(&self, _endpoint: &Endpoint) -> Result<(), EndpointError> {
        remove_if_present(&self.address_file)
    }
}
