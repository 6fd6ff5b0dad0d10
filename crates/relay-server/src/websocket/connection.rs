//! Connection handle: the shared, send-side view of one client connection,
//! its dedicated writer task, and the receive side owned by its session loop.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::message::RelayMessage;
use crate::errors::RelayError;
use crate::ids::ConnectionId;

/// A live client connection, shared between its session loop and any task
/// broadcasting to it.
///
/// Writes go through a bounded queue drained by a single writer task, so
/// concurrent `send` calls never interleave frames of different messages.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    send_timeout: Duration,
    connected_at: Instant,
    is_alive: AtomicBool,
}

impl ConnectionHandle {
    /// Create a handle over an existing outbound queue.
    ///
    /// The caller owns the receiving end; [`ConnectionHandle::open`] wires
    /// it to a socket writer.
    pub fn new(
        peer: Option<SocketAddr>,
        tx: mpsc::Sender<Message>,
        cancel: CancellationToken,
        send_timeout: Duration,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            tx,
            cancel,
            send_timeout,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
        }
    }

    /// Create a handle and spawn the writer task that owns `sink`.
    ///
    /// The handle's token is a child of `parent`, so cancelling `parent`
    /// closes the connection.
    pub fn open<W>(
        sink: W,
        peer: Option<SocketAddr>,
        queue_capacity: usize,
        send_timeout: Duration,
        parent: &CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
    {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Arc::new(Self::new(peer, tx, parent.child_token(), send_timeout));
        let writer = tokio::spawn(run_writer(sink, rx, handle.cancel.clone(), handle.id.clone()));
        (handle, writer)
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Remote address, when known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a message for delivery.
    ///
    /// Waits at most the send timeout for queue space. Fails with
    /// [`RelayError::ConnectionClosed`] once the handle is closed or its
    /// writer has exited; never panics.
    pub async fn send(&self, message: RelayMessage) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RelayError::ConnectionClosed),
            result = self.tx.send_timeout(message.into(), self.send_timeout) => match result {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(RelayError::SendTimeout(self.send_timeout)),
                Err(SendTimeoutError::Closed(_)) => Err(RelayError::ConnectionClosed),
            },
        }
    }

    /// Queue a message without waiting.
    ///
    /// Fails with [`RelayError::QueueFull`] when the outbound queue has no
    /// room; the message is dropped for this connection only.
    pub fn try_send(&self, message: RelayMessage) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        self.tx.try_send(message.into()).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::QueueFull,
            TrySendError::Closed(_) => RelayError::ConnectionClosed,
        })
    }

    /// Queue a ping frame without waiting. Returns `false` if it was not queued.
    pub fn ping(&self) -> bool {
        !self.is_closed() && self.tx.try_send(Message::Ping(Bytes::new())).is_ok()
    }

    /// Close the connection. Idempotent and callable from any task.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// A clone of the connection's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Drain the outbound queue into `sink` until the connection is closed,
/// the queue is dropped, or a write fails.
///
/// On exit the token is cancelled so the owning session loop notices a dead
/// writer.
pub async fn run_writer<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    conn_id: ConnectionId,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = rx.recv() => match msg {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        debug!(conn_id = %conn_id, error = %e, "write failed, stopping writer");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    cancel.cancel();
    trace!(conn_id = %conn_id, "writer stopped");
}

/// Outcome of one [`Inbound::receive`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// A complete data message.
    Message(RelayMessage),
    /// The peer closed the stream.
    EndOfStream,
    /// The transport failed. Terminal for this connection.
    Error(RelayError),
}

/// Receive side of a connection, owned by exactly one session loop.
pub struct Inbound<S> {
    stream: S,
    handle: Arc<ConnectionHandle>,
}

impl<S, E> Inbound<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    /// Wrap the read half of a connection.
    pub fn new(stream: S, handle: Arc<ConnectionHandle>) -> Self {
        Self { stream, handle }
    }

    /// Wait for the next data message, end of stream, or transport error.
    ///
    /// Ping and pong frames refresh liveness and are otherwise skipped.
    pub async fn receive(&mut self) -> Received {
        loop {
            match self.stream.next().await {
                None => return Received::EndOfStream,
                Some(Err(e)) => return Received::Error(RelayError::Transport(e.to_string())),
                Some(Ok(frame)) => {
                    self.handle.mark_alive();
                    if matches!(frame, Message::Close(_)) {
                        return Received::EndOfStream;
                    }
                    if let Some(message) = RelayMessage::from_frame(frame) {
                        return Received::Message(message);
                    }
                }
            }
        }
    }
}
