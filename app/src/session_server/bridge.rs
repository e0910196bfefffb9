//! Bridge types for command bridge ↔ workbench communication.
//!
//! The TCP server runs on its own threads and never touches editor state.
//! Each decoded request is sent as a `SessionRequest` through an mpsc channel
//! to the host thread, which owns the [`Workbench`](crate::Workbench) and
//! answers through a oneshot channel. Requests are handled strictly in arrival
//! order, so every client observes its own earlier writes.

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;
use tidemark_protocol::{Request, Response};

use super::target::ConnectionId;

/// A simple oneshot channel for single-use responses.
/// Uses std::sync::mpsc under the hood.
pub mod oneshot {
    use std::sync::mpsc;
    use std::time::Duration;

    pub struct Sender<T>(mpsc::SyncSender<T>);
    pub struct Receiver<T>(mpsc::Receiver<T>);

    impl<T> Sender<T> {
        pub fn send(self, value: T) -> Result<(), T> {
            self.0.send(value).map_err(|e| e.0)
        }
    }

    impl<T> Receiver<T> {
        pub fn recv_timeout(self, timeout: Duration) -> Result<T, RecvError> {
            self.0.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => RecvError::Timeout,
                mpsc::RecvTimeoutError::Disconnected => RecvError::Closed,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RecvError {
        Closed,
        Timeout,
    }

    pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
        // Buffer of 1 for oneshot semantics
        let (tx, rx) = mpsc::sync_channel(1);
        (Sender(tx), Receiver(rx))
    }
}

/// Requests from the command bridge to the host thread.
pub enum SessionRequest {
    /// Resolve a target and run one command on behalf of a connection.
    Execute {
        conn_id: ConnectionId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
}

/// Handle passed to the server for sending requests to the host thread.
#[derive(Clone)]
pub struct SessionBridgeHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionBridgeHandle {
    pub fn new(tx: mpsc::Sender<SessionRequest>) -> Self {
        Self { tx }
    }

    /// Send a request and wait up to `timeout` for its reply. A timeout does
    /// not cancel the request: it may still be applied afterwards.
    pub fn execute(
        &self,
        conn_id: ConnectionId,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, BridgeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Execute {
                conn_id,
                request,
                reply: reply_tx,
            })
            .map_err(|_| BridgeError::ChannelClosed)?;
        reply_rx.recv_timeout(timeout).map_err(|e| match e {
            oneshot::RecvError::Timeout => BridgeError::Timeout,
            oneshot::RecvError::Closed => BridgeError::ChannelClosed,
        })
    }
}

/// Errors from bridge communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The host thread is gone or dropped the request.
    #[error("workbench channel closed")]
    ChannelClosed,

    #[error("timed out waiting for the workbench")]
    Timeout,
}
