//! Control Server
//!
//! Terminates the line protocol on the bound endpoint and feeds the command
//! queue:
//! - Accept loop spawns one task per connection
//! - Each connection reads one line (bounded by the read timeout)
//! - The request is enqueued without waiting, or rejected as `busy`
//! - The reply is awaited (bounded by the reply timeout) and written back
//!
//! ```text
//!  client ──line──► handle_connection ──try_submit──► CommandQueue ──► Dispatcher
//!  client ◄──line── handle_connection ◄──oneshot Reply───────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::protocol::{ProtocolError, Reply, Request, MAX_REQUEST_BYTES};
use super::queue::{CommandSender, DEFAULT_QUEUE_CAPACITY};
use super::ControlError;
use crate::endpoint::{ControlConnection, ControlListener, Endpoint, EndpointError, EndpointResolver};

/// Default bound on reading the request line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on waiting for the dispatcher's reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Server policy knobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum outstanding commands before requests are answered `busy`
    pub queue_capacity: usize,
    /// How long a client has to send its request line
    pub read_timeout: Duration,
    /// How long a connection waits for the dispatcher
    pub reply_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Identifies one accepted connection in logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State shared between the server handle and its tasks
#[derive(Default)]
struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raise the flag; returns `false` if it was already raised
    fn raise(&self) -> bool {
        if self.flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        // notify_one stores a permit if the accept loop is not parked yet
        self.notify.notify_one();
        true
    }
}

/// Local control server
///
/// Created by [`ControlServer::start`]; stop it with [`ControlServer::close`].
pub struct ControlServer {
    endpoint: Endpoint,
    resolver: Arc<dyn EndpointResolver>,
    shutdown: Arc<Shutdown>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlServer {
    /// Bind the endpoint and start accepting connections
    ///
    /// Bind failures are returned to the caller, which may carry on without
    /// remote control.
    pub async fn start(
        resolver: Arc<dyn EndpointResolver>,
        commands: CommandSender,
        config: ServerConfig,
    ) -> Result<Self, EndpointError> {
        let (listener, endpoint) = resolver.listen().await?;
        let shutdown = Arc::new(Shutdown::default());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            commands,
            config,
            Arc::clone(&shutdown),
        ));

        info!(endpoint = %endpoint, "Control server started");

        Ok(Self {
            endpoint,
            resolver,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Endpoint clients should connect to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_raised()
    }

    /// Stop accepting, release the listener and remove the endpoint artifact
    ///
    /// Idempotent. Connections already in flight finish their own bounded
    /// waits.
    pub async fn close(&self) {
        if !self.shutdown.raise() {
            return;
        }

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }

        if let Err(e) = self.resolver.cleanup(&self.endpoint) {
            warn!(error = %e, endpoint = %self.endpoint, "Failed to clean up control endpoint");
        }

        info!(endpoint = %self.endpoint, "Control server closed");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if self.shutdown.raise() {
            if let Some(task) = self.accept_task.lock().take() {
                task.abort();
            }
            if let Err(e) = self.resolver.cleanup(&self.endpoint) {
                warn!(error = %e, "Failed to clean up control endpoint on drop");
            }
        }
    }
}

async fn accept_loop(
    listener: ControlListener,
    commands: CommandSender,
    config: ServerConfig,
    shutdown: Arc<Shutdown>,
) {
    loop {
        if shutdown.is_raised() {
            break;
        }

        let accepted = tokio::select! {
            () = shutdown.notify.notified() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                let conn_id = ConnectionId::new();
                debug!(conn_id = %conn_id, "Connection accepted");
                tokio::spawn(
                    handle_connection(
                        conn,
                        commands.clone(),
                        config.clone(),
                        Arc::clone(&shutdown),
                    )
                    .instrument(tracing::info_span!("connection", %conn_id)),
                );
            }
            Err(e) => {
                if shutdown.is_raised() {
                    break;
                }
                debug!(error = %e, "Accept failed, continuing");
            }
        }
    }

    drop(listener);
    info!("Accept loop stopped");
}

/// Serve exactly one request on `conn`
async fn handle_connection(
    conn: Box<dyn ControlConnection>,
    commands: CommandSender,
    config: ServerConfig,
    shutdown: Arc<Shutdown>,
) {
    let (read_half, mut write_half) = tokio::io::split(conn);

    let reply = match read_request(read_half, config.read_timeout).await {
        Ok(request) => submit(request, &commands, &shutdown, config.reply_timeout).await,
        Err(e) => {
            debug!(error = %e, "Rejecting request");
            Reply::from(ControlError::from(e))
        }
    };

    if let Err(e) = write_half.write_all(reply.encode().as_bytes()).await {
        warn!(error = %e, "Failed to write reply");
        return;
    }
    if let Err(e) = write_half.shutdown().await {
        debug!(error = %e, "Failed to shut down connection");
    }
}

/// Read one request line within `deadline`
///
/// A missing line (EOF, read error or elapsed deadline) counts as an empty
/// command.
async fn read_request<R>(reader: R, deadline: Duration) -> Result<Request, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(MAX_REQUEST_BYTES).unwrap_or(u64::MAX).saturating_add(1);
    let mut reader = BufReader::new(reader.take(limit));
    let mut buf = Vec::new();

    match tokio::time::timeout(deadline, reader.read_until(b'\n', &mut buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!(error = %e, "Read error");
            return Err(ProtocolError::Empty);
        }
        Err(_) => {
            debug!(deadline_ms = deadline.as_millis(), "Read deadline elapsed");
            return Err(ProtocolError::Empty);
        }
    }

    if buf.len() > MAX_REQUEST_BYTES {
        return Err(ProtocolError::TooLong);
    }

    let line = String::from_utf8(buf).map_err(|_| ProtocolError::Malformed)?;
    Request::parse(&line)
}

/// Enqueue `request` and wait for its reply
async fn submit(
    request: Request,
    commands: &CommandSender,
    shutdown: &Shutdown,
    reply_timeout: Duration,
) -> Reply {
    if shutdown.is_raised() {
        return ControlError::ShuttingDown.into();
    }

    let verb = request.verb().to_string();
    let reply_rx = match commands.try_submit(request) {
        Ok(rx) => rx,
        Err(e) => return e.into(),
    };

    match tokio::time::timeout(reply_timeout, reply_rx).await {
        Ok(Ok(reply)) => {
            debug!(verb = %verb, ok = reply.ok, "Command completed");
            reply
        }
        Ok(Err(_)) => {
            warn!(verb = %verb, "Dispatcher dropped the command");
            ControlError::ShuttingDown.into()
        }
        Err(_) => {
            warn!(verb = %verb, timeout_ms = reply_timeout.as_millis(), "Timed out waiting for reply");
            ControlError::Timeout.into()
        }
    }
}
