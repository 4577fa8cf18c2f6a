//! Control client
//!
//! One connection per request: connect, write a line, read a line.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::protocol::{Reply, Request, Verb};
use crate::endpoint::{Endpoint, EndpointError, EndpointResolver};

/// Default bound on a whole request/reply exchange
///
/// Covers the server's read deadline plus its reply wait.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while talking to a running instance
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be resolved
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Nothing is listening on the endpoint
    #[error("no running instance at {endpoint}: {source}")]
    Connect {
        /// Endpoint that refused the connection
        endpoint: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Reading or writing the connection failed
    #[error("control connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exchange did not complete in time
    #[error("timed out waiting for reply")]
    Timeout,

    /// The server closed the connection without replying
    #[error("connection closed without reply")]
    NoReply,
}

/// Client for an already-running instance
#[derive(Clone, Debug)]
pub struct ControlClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl ControlClient {
    /// Client for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Client for whatever endpoint `resolver` currently points at
    pub fn resolve(resolver: &dyn EndpointResolver) -> Result<Self, ClientError> {
        Ok(Self::new(resolver.resolve()?))
    }

    /// Override the exchange timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a request and decode the reply
    pub async fn send(&self, request: &Request) -> Result<Reply, ClientError> {
        self.send_line(&request.encode()).await
    }

    /// Send a raw request line and decode the reply
    ///
    /// Only the first line of `line` is sent.
    pub async fn send_line(&self, line: &str) -> Result<Reply, ClientError> {
        let line = line.lines().next().unwrap_or_default();
        tokio::time::timeout(self.timeout, self.exchange(line))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Whether an instance answers on the endpoint
    pub async fn ping(&self) -> bool {
        match self.send(&Request::new(Verb::Ping, None)).await {
            Ok(reply) => reply.ok,
            Err(e) => {
                tracing::debug!(error = %e, endpoint = %self.endpoint, "Ping failed");
                false
            }
        }
    }

    async fn exchange(&self, line: &str) -> Result<Reply, ClientError> {
        let conn = self
            .endpoint
            .connect()
            .await
            .map_err(|source| ClientError::Connect {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        let (read_half, mut write_half) = tokio::io::split(conn);
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            return Err(ClientError::NoReply);
        }

        tracing::debug!(request = line, reply = reply.trim_end(), "Control exchange complete");
        Ok(Reply::decode(&reply))
    }
}
