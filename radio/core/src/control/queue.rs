//! Bounded command queue
//!
//! Many producers (one per connection), one consumer (the dispatcher).
//! Producers never wait for space: a full queue is reported as
//! [`ControlError::Busy`] straight away.

use tokio::sync::{mpsc, oneshot};

use super::protocol::{Reply, Request};
use super::ControlError;

/// Default number of outstanding commands
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// A request paired with the slot its reply goes into
#[derive(Debug)]
pub struct Command {
    /// The parsed request
    pub request: Request,
    reply: oneshot::Sender<Reply>,
}

impl Command {
    /// Publish the reply, consuming the command
    pub fn respond(self, reply: Reply) {
        if self.reply.send(reply).is_err() {
            tracing::debug!(verb = %self.request.verb(), "Requester went away before reply");
        }
    }
}

/// Producer side of the queue
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Enqueue `request` without waiting
    ///
    /// Returns the receiver the reply will arrive on.
    pub fn try_submit(&self, request: Request) -> Result<oneshot::Receiver<Reply>, ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command {
            request,
            reply: reply_tx,
        };

        match self.tx.try_send(command) {
            Ok(()) => Ok(reply_rx),
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                tracing::warn!(verb = %cmd.request.verb(), "Command queue full, rejecting");
                Err(ControlError::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControlError::ShuttingDown),
        }
    }

    /// Maximum number of outstanding commands
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer side of the queue
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Wait for the next command; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Take a command if one is waiting
    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

/// Create a queue holding up to `capacity` outstanding commands
///
/// A capacity of zero is raised to one.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandSender { tx }, CommandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop() -> Request {
        Request::parse("STOP").unwrap()
    }

    #[test]
    fn test_full_queue_is_busy() {
        let (tx, _rx) = command_queue(DEFAULT_QUEUE_CAPACITY);
        assert_eq!(tx.capacity(), 8);

        let mut pending = Vec::new();
        for _ in 0..DEFAULT_QUEUE_CAPACITY {
            pending.push(tx.try_submit(stop()).unwrap());
        }

        assert_eq!(tx.try_submit(stop()).unwrap_err(), ControlError::Busy);
    }

    #[test]
    fn test_closed_queue_is_shutting_down() {
        let (tx, rx) = command_queue(2);
        drop(rx);
        assert_eq!(
            tx.try_submit(stop()).unwrap_err(),
            ControlError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_fifo_and_reply() {
        let (tx, mut rx) = command_queue(4);

        let first = tx.try_submit(Request::parse("PING").unwrap()).unwrap();
        let _second = tx.try_submit(stop()).unwrap();

        let cmd = rx.recv().await.unwrap();
        assert_eq!(cmd.request.verb(), "PING");
        cmd.respond(Reply::data("PONG"));
        assert_eq!(first.await.unwrap(), Reply::data("PONG"));

        let cmd = rx.recv().await.unwrap();
        assert_eq!(cmd.request.verb(), "STOP");
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let (tx, _rx) = command_queue(0);
        assert_eq!(tx.capacity(), 1);
    }

    #[test]
    fn test_dequeue_frees_space() {
        let (tx, mut rx) = command_queue(1);
        let _a = tx.try_submit(stop()).unwrap();
        assert_eq!(tx.try_submit(stop()).unwrap_err(), ControlError::Busy);

        let _cmd = rx.try_recv().unwrap();
        assert!(tx.try_submit(stop()).is_ok());
    }
}
