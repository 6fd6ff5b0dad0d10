//! Orderbook feed: each connected client gets a server-generated payload on
//! a fixed interval. Feed clients are never registered for chat fan-out and
//! their input is never read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::WebSocket;
use chrono::Utc;
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::ConnectionHandle;
use super::message::RelayMessage;
use crate::config::ServerConfig;
use crate::errors::RelayError;
use crate::metrics::{
    FEED_CONNECTIONS_ACTIVE, FEED_PAYLOADS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Produces the payloads pushed to a feed client.
pub trait FeedSource: Send {
    /// The next payload to send.
    fn next_payload(&mut self) -> RelayMessage;
}

/// Format one orderbook payload for a nanosecond timestamp.
pub fn orderbook_payload(nanos: i64) -> String {
    format!("orderbook data -> {nanos}\n")
}

/// Wall-clock orderbook ticker.
///
/// Timestamps are nanoseconds since the Unix epoch, strictly increasing per
/// ticker even if the wall clock steps backwards.
#[derive(Debug, Default)]
pub struct OrderbookTicker {
    last_nanos: i64,
}

impl OrderbookTicker {
    /// Create a ticker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, always greater than the previous one.
    pub fn next_timestamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(self.last_nanos);
        let next = now.max(self.last_nanos.saturating_add(1));
        self.last_nanos = next;
        next
    }
}

impl FeedSource for OrderbookTicker {
    fn next_payload(&mut self) -> RelayMessage {
        RelayMessage::text(orderbook_payload(self.next_timestamp()))
    }
}

/// Why a feed session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedTermination {
    /// A send failed; the client is unreachable.
    PeerGone(RelayError),
    /// The handle was closed (writer failure or shutdown).
    Closed,
}

/// Push one payload immediately, then one per `period`, until a send fails
/// or the handle is closed.
///
/// A tick delayed by a slow send pushes later ticks back rather than
/// bursting to catch up.
pub async fn run_feed_session<F: FeedSource>(
    handle: &ConnectionHandle,
    source: &mut F,
    period: Duration,
) -> FeedTermination {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = handle.closed() => return FeedTermination::Closed,
            _ = ticker.tick() => {}
        }
        if let Err(e) = handle.send(source.next_payload()).await {
            return FeedTermination::PeerGone(e);
        }
        counter!(FEED_PAYLOADS_TOTAL).increment(1);
    }
}

struct ActiveFeed(Arc<AtomicUsize>);

impl ActiveFeed {
    fn enter(count: Arc<AtomicUsize>) -> Self {
        let _ = count.fetch_add(1, Ordering::Relaxed);
        gauge!(FEED_CONNECTIONS_ACTIVE).increment(1.0);
        Self(count)
    }
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
        gauge!(FEED_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

/// Serve an upgraded feed socket until the client goes away or the server
/// shuts down.
pub async fn serve_feed(
    socket: WebSocket,
    peer: Option<SocketAddr>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    active_feeds: Arc<AtomicUsize>,
) {
    let (sink, stream) = socket.split();
    drop(stream);
    let (handle, writer) = ConnectionHandle::open(
        sink,
        peer,
        config.send_queue_capacity,
        config.send_timeout,
        &shutdown,
    );
    let _active = ActiveFeed::enter(active_feeds);
    feed_connection(handle, writer, config).await;
}

#[instrument(
    skip_all,
    fields(conn_id = %handle.id(), peer = ?handle.peer())
)]
async fn feed_connection(
    handle: Arc<ConnectionHandle>,
    mut writer: JoinHandle<()>,
    config: Arc<ServerConfig>,
) {
    counter!(WS_CONNECTIONS_TOTAL, "endpoint" => "feed").increment(1);
    info!("feed client connected");

    let mut ticker = OrderbookTicker::new();
    let termination = run_feed_session(&handle, &mut ticker, config.feed_interval).await;

    handle.close();
    if time::timeout(config.send_timeout, &mut writer).await.is_err() {
        debug!("writer did not stop in time, aborting");
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "endpoint" => "feed").increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS, "endpoint" => "feed")
        .record(handle.age().as_secs_f64());
    info!(reason = ?termination, "feed client disconnected");
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;

    fn make_handle(capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ConnectionHandle::new(
            None,
            tx,
            CancellationToken::new(),
            Duration::from_millis(100),
        );
        (Arc::new(handle), rx)
    }

    fn spawn_feed(
        handle: &Arc<ConnectionHandle>,
        period: Duration,
    ) -> tokio::task::JoinHandle<FeedTermination> {
        let handle = Arc::clone(handle);
        tokio::spawn(async move {
            let mut ticker = OrderbookTicker::new();
            run_feed_session(&handle, &mut ticker, period).await
        })
    }

    fn parse_nanos(frame: &Message) -> i64 {
        let Message::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        text.as_str()
            .strip_prefix("orderbook data -> ")
            .and_then(|rest| rest.strip_suffix('\n'))
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn payload_format() {
        assert_eq!(
            orderbook_payload(1_700_000_000_000_000_000),
            "orderbook data -> 1700000000000000000\n"
        );
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut ticker = OrderbookTicker::new();
        let mut last = ticker.next_timestamp();
        for _ in 0..1_000 {
            let next = ticker.next_timestamp();
            assert!(next > last, "{next} <= {last}");
            last = next;
        }
    }

    #[test]
    fn timestamps_survive_clock_going_backwards() {
        let mut ticker = OrderbookTicker {
            last_nanos: i64::MAX - 10,
        };
        assert_eq!(ticker.next_timestamp(), i64::MAX - 9);
    }

    #[test]
    fn ticker_payload_is_text() {
        let mut ticker = OrderbookTicker::new();
        let msg = ticker.next_payload();
        let text = msg.as_text().unwrap();
        assert!(text.starts_with("orderbook data -> "));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test(start_paused = true)]
    async fn first_payload_is_immediate_then_periodic() {
        let (handle, mut rx) = make_handle(16);
        let task = spawn_feed(&handle, Duration::from_secs(2));

        let first = rx.recv().await.unwrap();
        let t0 = time::Instant::now();

        time::sleep(Duration::from_millis(1_900)).await;
        assert!(rx.try_recv().is_err());

        let second = rx.recv().await.unwrap();
        assert_eq!(t0.elapsed(), Duration::from_secs(2));
        let third = rx.recv().await.unwrap();
        assert_eq!(t0.elapsed(), Duration::from_secs(4));

        let stamps = [parse_nanos(&first), parse_nanos(&second), parse_nanos(&third)];
        assert!(stamps[0] < stamps[1] && stamps[1] < stamps[2]);

        handle.close();
        assert_eq!(task.await.unwrap(), FeedTermination::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_peer_is_gone() {
        let (handle, rx) = make_handle(16);
        drop(rx);
        let task = spawn_feed(&handle, Duration::from_secs(2));
        assert_eq!(
            task.await.unwrap(),
            FeedTermination::PeerGone(RelayError::ConnectionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_are_independent() {
        let (a, mut a_rx) = make_handle(16);
        let (b, mut b_rx) = make_handle(16);
        let a_task = spawn_feed(&a, Duration::from_secs(2));
        let b_task = spawn_feed(&b, Duration::from_secs(2));

        let _ = a_rx.recv().await.unwrap();
        let _ = b_rx.recv().await.unwrap();
        a.close();
        assert_eq!(a_task.await.unwrap(), FeedTermination::Closed);

        let next = b_rx.recv().await.unwrap();
        assert!(parse_nanos(&next) > 0);
        b.close();
        assert_eq!(b_task.await.unwrap(), FeedTermination::Closed);
    }

    #[tokio::test]
    async fn active_feed_guard_counts() {
        let count = Arc::new(AtomicUsize::new(0));
        let guard = ActiveFeed::enter(Arc::clone(&count));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        drop(guard);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
