//! Chat session lifecycle: one connected client from upgrade through
//! disconnect, relaying everything it sends to the other chat clients.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::broadcast::Broadcaster;
use super::connection::{ConnectionHandle, Inbound, Received};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::errors::RelayError;
use crate::metrics::{
    CHAT_CONNECTIONS_ACTIVE, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Lifecycle phase of a chat session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatPhase {
    /// Upgraded, not yet visible to broadcasts.
    Connecting,
    /// In the registry, waiting for input.
    Registered,
    /// Relaying a received message.
    Relaying,
    /// Leaving the loop.
    Terminating,
    /// Deregistered and closed.
    Closed,
}

impl ChatPhase {
    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Relaying => "relaying",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        }
    }
}

fn transition(phase: ChatPhase) {
    debug!(phase = phase.as_str(), "chat session phase");
}

/// Why a chat session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatTermination {
    /// The client closed its side.
    EndOfStream,
    /// Reading from the client failed.
    TransportError(RelayError),
    /// The handle was closed (heartbeat timeout, writer failure, shutdown).
    Closed,
}

/// Deregisters then closes the handle when the session ends, however it
/// ends (including task abort).
struct SessionCleanup {
    broadcaster: Arc<Broadcaster>,
    handle: Arc<ConnectionHandle>,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        let _ = self.broadcaster.registry().deregister(self.handle.id());
        self.handle.close();
        gauge!(CHAT_CONNECTIONS_ACTIVE).decrement(1.0);
        transition(ChatPhase::Closed);
    }
}

/// Drive one chat connection until it ends.
///
/// The handle is registered first, so it receives broadcasts from that
/// point on. Each received message is queued for every recipient before
/// the next one is read, which keeps one sender's messages in order at
/// every recipient. Queuing never waits on a recipient, so a stalled
/// client cannot hold up this sender.
#[instrument(skip_all, fields(conn_id = %handle.id()))]
pub async fn run_chat_session<S, E>(
    mut inbound: Inbound<S>,
    handle: Arc<ConnectionHandle>,
    broadcaster: Arc<Broadcaster>,
) -> ChatTermination
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    transition(ChatPhase::Connecting);
    if !broadcaster.registry().register(Arc::clone(&handle)) {
        warn!("connection already registered");
    }
    gauge!(CHAT_CONNECTIONS_ACTIVE).increment(1.0);
    let _cleanup = SessionCleanup {
        broadcaster: Arc::clone(&broadcaster),
        handle: Arc::clone(&handle),
    };
    transition(ChatPhase::Registered);

    let termination = loop {
        let received = tokio::select! {
            biased;
            () = handle.closed() => break ChatTermination::Closed,
            received = inbound.receive() => received,
        };
        match received {
            Received::Message(message) => {
                transition(ChatPhase::Relaying);
                let _ = broadcaster.broadcast(&message, Some(handle.id()));
            }
            Received::EndOfStream => break ChatTermination::EndOfStream,
            Received::Error(e) => break ChatTermination::TransportError(e),
        }
    };

    transition(ChatPhase::Terminating);
    termination
}

/// Serve an upgraded chat socket: start its writer and heartbeat, run the
/// session loop, and wait for both companions to stop.
pub async fn serve_chat(
    socket: WebSocket,
    peer: Option<SocketAddr>,
    broadcaster: Arc<Broadcaster>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (sink, stream) = socket.split();
    let (handle, writer) = ConnectionHandle::open(
        sink,
        peer,
        config.send_queue_capacity,
        config.send_timeout,
        &shutdown,
    );
    chat_connection(stream, handle, writer, broadcaster, config).await;
}

#[instrument(
    skip_all,
    fields(conn_id = %handle.id(), peer = ?handle.peer())
)]
async fn chat_connection(
    stream: SplitStream<WebSocket>,
    handle: Arc<ConnectionHandle>,
    mut writer: JoinHandle<()>,
    broadcaster: Arc<Broadcaster>,
    config: Arc<ServerConfig>,
) {
    counter!(WS_CONNECTIONS_TOTAL, "endpoint" => "chat").increment(1);
    info!("chat client connected");

    let heartbeat = {
        let handle = Arc::clone(&handle);
        let interval = config.heartbeat_interval;
        let timeout = config.heartbeat_timeout;
        tokio::spawn(
            async move {
                if run_heartbeat(Arc::clone(&handle), interval, timeout, handle.token()).await
                    == HeartbeatResult::TimedOut
                {
                    warn!(?timeout, "client unresponsive, disconnecting");
                    handle.close();
                }
            }
            .instrument(Span::current()),
        )
    };

    let inbound = Inbound::new(stream, Arc::clone(&handle));
    let termination = run_chat_session(inbound, Arc::clone(&handle), broadcaster).await;

    let _ = heartbeat.await;
    if tokio::time::timeout(config.send_timeout, &mut writer).await.is_err() {
        debug!("writer did not stop in time, aborting");
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "endpoint" => "chat").increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS, "endpoint" => "chat")
        .record(handle.age().as_secs_f64());
    match &termination {
        ChatTermination::TransportError(e) => {
            info!(error = %e, "chat client disconnected after read error");
        }
        other => info!(reason = ?other, "chat client disconnected"),
    }
}
