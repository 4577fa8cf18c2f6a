//! Command dispatcher
//!
//! The single consumer of the command queue. Commands run one at a time, in
//! arrival order, against the shared [`PlaybackSupervisor`].

use std::sync::Arc;

use super::protocol::{Reply, Request, Verb};
use super::queue::CommandReceiver;
use crate::supervisor::PlaybackSupervisor;

/// Executes queued commands against the supervisor
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: Arc<PlaybackSupervisor>,
}

impl Dispatcher {
    /// Dispatch onto `supervisor`
    pub fn new(supervisor: Arc<PlaybackSupervisor>) -> Self {
        Self { supervisor }
    }

    /// Drain `commands` until every sender is dropped
    pub async fn run(self, mut commands: CommandReceiver) {
        tracing::info!("Dispatcher started");
        while let Some(command) = commands.recv().await {
            let reply = self.execute(&command.request);
            command.respond(reply);
        }
        tracing::info!("Command queue closed, dispatcher stopping");
    }

    /// Execute one request and produce its reply
    pub fn execute(&self, request: &Request) -> Reply {
        let Some(verb) = Verb::from_name(request.verb()) else {
            tracing::debug!(verb = %request.verb(), "Unknown command");
            return Reply::error(format!("unknown command: {}", request.verb()));
        };

        tracing::debug!(%verb, argument = ?request.argument(), "Executing command");

        match verb {
            Verb::Ping => Reply::data("PONG"),
            Verb::Play => self.play(request.argument().unwrap_or_default()),
            Verb::Stop => {
                self.supervisor.stop();
                Reply::ok()
            }
            Verb::Toggle => self.toggle(),
            Verb::Status => {
                let status = self.supervisor.status();
                match (status.playing, status.last_url) {
                    (true, Some(url)) => Reply::data(format!("PLAYING {url}")),
                    (true, None) => Reply::data("PLAYING"),
                    (false, _) => Reply::data("STOPPED"),
                }
            }
            Verb::Last => match self.supervisor.last_url() {
                Some(url) => Reply::data(url),
                None => Reply::error("no stream played yet"),
            },
        }
    }

    fn play(&self, url: &str) -> Reply {
        match self.supervisor.play(url) {
            Ok(_) => Reply::ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Play failed");
                Reply::error(e.to_string())
            }
        }
    }

    fn toggle(&self) -> Reply {
        if self.supervisor.stop() {
            return Reply::ok();
        }
        match self.supervisor.last_url() {
            Some(url) => self.play(&url),
            None => Reply::error("nothing to resume"),
        }
    }
}
