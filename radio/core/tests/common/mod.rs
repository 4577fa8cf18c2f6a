//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use valvefm_core::control::CommandReceiver;
use valvefm_core::endpoint::{EndpointResolver, UnixSocketResolver};
use valvefm_core::{
    command_queue, BackendLocator, ControlServer, Dispatcher, Endpoint, PlaybackSupervisor,
    ServerConfig,
};

/// A stand-in `mpv`: URLs containing "quick" exit at once, anything else
/// keeps running until killed.
const FAKE_MPV: &str = "#!/bin/sh\ncase \"$*\" in *quick*) exit 0 ;; esac\nexec sleep 30\n";

/// Write the fake player into `dir` and return a locator that only sees it
pub fn fake_backend(dir: &Path) -> BackendLocator {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let path = bin.join("mpv");
    std::fs::write(&path, FAKE_MPV).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    BackendLocator::isolated(vec![bin])
}

pub fn fake_supervisor(dir: &Path) -> Arc<PlaybackSupervisor> {
    Arc::new(PlaybackSupervisor::new(&fake_backend(dir)).unwrap())
}

/// A running server with a dispatcher attached
pub struct Instance {
    pub dir: TempDir,
    pub resolver: Arc<dyn EndpointResolver>,
    pub supervisor: Arc<PlaybackSupervisor>,
    pub server: ControlServer,
}

impl Instance {
    pub async fn start() -> Self {
        Self::start_with(|dir| Arc::new(UnixSocketResolver::new(dir.to_path_buf()))).await
    }

    pub async fn start_with<F>(make_resolver: F) -> Self
    where
        F: FnOnce(&Path) -> Arc<dyn EndpointResolver>,
    {
        let dir = TempDir::new().unwrap();
        let resolver = make_resolver(dir.path());
        let supervisor = fake_supervisor(dir.path());

        let (tx, rx) = command_queue(ServerConfig::default().queue_capacity);
        tokio::spawn(Dispatcher::new(Arc::clone(&supervisor)).run(rx));

        let server = ControlServer::start(Arc::clone(&resolver), tx, ServerConfig::default())
            .await
            .unwrap();

        Self {
            dir,
            resolver,
            supervisor,
            server,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.server.endpoint().clone()
    }
}

/// A server whose queue is never drained by a dispatcher
pub async fn stalled_server(
    dir: &Path,
    config: ServerConfig,
) -> (ControlServer, CommandReceiver) {
    let resolver: Arc<dyn EndpointResolver> = Arc::new(UnixSocketResolver::new(dir.to_path_buf()));
    let (tx, rx) = command_queue(config.queue_capacity);
    let server = ControlServer::start(resolver, tx, config).await.unwrap();
    (server, rx)
}

/// Write raw bytes and read back the full reply
pub async fn raw_exchange(endpoint: &Endpoint, bytes: &[u8]) -> String {
    let mut conn = endpoint.connect().await.unwrap();
    conn.write_all(bytes).await.unwrap();
    let mut reply = String::new();
    conn.read_to_string(&mut reply).await.unwrap();
    reply
}

/// Poll `cond` until it holds or `limit` elapses
pub async fn eventually<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Whether `pid` still names a running process
///
/// Killed but unreaped children (zombies) count as gone.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state letter follows the parenthesised command name
            return stat
                .rsplit_once(')')
                .map_or(true, |(_, rest)| !rest.trim_start().starts_with(['Z', 'X']));
        }
    }

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid, 0) == 0 }
}
