//! The headless player instance
//!
//! Owns the playback supervisor, the command dispatcher and (when the
//! endpoint could be bound) the control server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use valvefm_core::{
    command_queue, BackendLocator, ControlClient, ControlServer, Dispatcher, EndpointResolver,
    PlaybackSupervisor, Reply, Request, ServerConfig, ValvefmConfig, Verb,
};

/// A running player instance
pub struct Instance {
    supervisor: Arc<PlaybackSupervisor>,
    server: Option<ControlServer>,
    dispatcher: JoinHandle<()>,
    drain_timeout: Duration,
}

impl Instance {
    /// Build the supervisor and bring up the control server
    ///
    /// Failing to bind the endpoint is not fatal: the instance keeps running
    /// without remote control.
    pub async fn start(
        resolver: Arc<dyn EndpointResolver>,
        locator: &BackendLocator,
        server_config: ServerConfig,
    ) -> Result<Self> {
        let supervisor = Arc::new(
            PlaybackSupervisor::new(locator).context("No media backend available")?,
        );
        info!(
            backend = %supervisor.backend().kind(),
            program = ?supervisor.backend().program(),
            "Playback supervisor ready"
        );

        let (commands, queue) = command_queue(server_config.queue_capacity);
        let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&supervisor)).run(queue));
        let drain_timeout = server_config.read_timeout + server_config.reply_timeout;

        let server = match ControlServer::start(resolver, commands, server_config).await {
            Ok(server) => Some(server),
            Err(e) => {
                warn!(error = %e, "Control server unavailable, continuing without remote control");
                None
            }
        };

        Ok(Self {
            supervisor,
            server,
            dispatcher,
            drain_timeout,
        })
    }

    /// Shared supervisor, for in-process callers
    pub fn supervisor(&self) -> &Arc<PlaybackSupervisor> {
        &self.supervisor
    }

    /// The control server, if the endpoint was bound
    pub fn server(&self) -> Option<&ControlServer> {
        self.server.as_ref()
    }

    /// Start playing `url` directly, bypassing the socket
    pub fn play(&self, url: &str) -> Result<()> {
        self.supervisor
            .play(url)
            .with_context(|| format!("Failed to play {url}"))?;
        Ok(())
    }

    /// Stop playback, close the server and wait for the dispatcher to drain
    pub async fn shutdown(self) {
        info!("Performing graceful shutdown...");
        self.supervisor.stop();

        if let Some(server) = &self.server {
            server.close().await;
        }
        // In-flight connections still hold queue senders until their own
        // timeouts elapse
        drop(self.server);

        let mut dispatcher = self.dispatcher;
        match tokio::time::timeout(self.drain_timeout, &mut dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Dispatcher task failed"),
            Err(_) => {
                warn!("Dispatcher did not drain in time, aborting");
                dispatcher.abort();
            }
        }

        self.supervisor.stop();
        info!("valvefm stopped cleanly");
    }
}

/// Client for an instance that already answers `PING`, if there is one
pub async fn find_running(resolver: &dyn EndpointResolver) -> Option<ControlClient> {
    let client = ControlClient::resolve(resolver).ok()?;
    if client.ping().await {
        info!(endpoint = %client.endpoint(), "Found running instance");
        Some(client)
    } else {
        None
    }
}

/// Forward `url` to a running instance
pub async fn forward_play(client: &ControlClient, url: &str) -> Result<Reply> {
    client
        .send(&Request::new(Verb::Play, Some(url.to_string())))
        .await
        .with_context(|| format!("Failed to forward play to {}", client.endpoint()))
}

/// `valvefm serve [URL]`
///
/// Returns the reply from an already-running instance when the request was
/// handed off to it, or `None` after running until a shutdown signal.
pub async fn serve(
    resolver: Arc<dyn EndpointResolver>,
    config: &ValvefmConfig,
    url: Option<String>,
) -> Result<Option<Reply>> {
    if let Some(client) = find_running(resolver.as_ref()).await {
        let reply = match url {
            Some(url) => forward_play(&client, &url).await?,
            None => Reply::data("already running"),
        };
        return Ok(Some(reply));
    }

    let instance = Instance::start(resolver, &config.backend_locator(), config.server.clone()).await?;

    if let Some(url) = url {
        if let Err(e) = instance.play(&url) {
            warn!(error = %e, "Initial playback failed");
        }
    }

    info!("valvefm ready");
    let signal = shutdown_signal().await;
    instance.shutdown().await;
    signal.map(|()| None)
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}
