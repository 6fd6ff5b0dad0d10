//! Heartbeat ping/pong liveness monitoring for chat connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::connection::ConnectionHandle;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run heartbeat pings for a connection.
///
/// Every `interval` a ping is queued and the alive flag is checked. Any
/// inbound frame since the previous tick resets the miss counter. After
/// `timeout / interval` consecutive misses (at least 1) the connection is
/// considered dead and [`HeartbeatResult::TimedOut`] is returned.
pub async fn run_heartbeat(
    connection: Arc<ConnectionHandle>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;

    let max_missed = max_missed_checks(interval, timeout);
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed_pongs = 0;
                } else {
                    missed_pongs = missed_pongs.saturating_add(1);
                    trace!(missed_pongs, "heartbeat missed");
                    if missed_pongs >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                let _ = connection.ping();
            }
        }
    }
}

/// Consecutive silent checks tolerated before timing out, at least 1.
///
/// Saturates at `u32::MAX` for timeouts far larger than the interval.
fn max_missed_checks(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;

    fn make_connection() -> (Arc<ConnectionHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ConnectionHandle::new(None, tx, CancellationToken::new(), Duration::from_secs(1));
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let (conn, _rx) = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(conn, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_times_out_when_silent() {
        let (conn, _rx) = make_connection();
        let _ = conn.check_alive();

        let result = run_heartbeat(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_each_tick() {
        let (conn, mut rx) = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let conn2 = Arc::clone(&conn);

        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, Duration::from_secs(1), Duration::from_secs(10), cancel2).await
        });

        time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);

        let mut pings = 0;
        while let Ok(frame) = rx.try_recv() {
            assert!(matches!(frame, Message::Ping(_)));
            pings += 1;
        }
        assert_eq!(pings, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_missed_count() {
        let (conn, _rx) = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let conn2 = Arc::clone(&conn);

        // 200ms interval, 600ms timeout: three silent ticks in a row to fail.
        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, Duration::from_millis(200), Duration::from_millis(600), cancel2)
                .await
        });

        for _ in 0..10 {
            time::sleep(Duration::from_millis(100)).await;
            conn.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[test]
    fn max_missed_checks_bounds() {
        let ms = Duration::from_millis;
        assert_eq!(max_missed_checks(ms(30_000), ms(90_000)), 3);
        assert_eq!(max_missed_checks(ms(1_000), ms(10)), 1);
        assert_eq!(max_missed_checks(Duration::ZERO, ms(5)), 5);
        // 2^32 ms over a 1 ms interval does not wrap to zero.
        assert_eq!(max_missed_checks(ms(1), ms(1 << 32)), u32::MAX);
        assert_eq!(max_missed_checks(ms(1), Duration::MAX), u32::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_does_not_close_early() {
        let (conn, _rx) = make_connection();
        let _ = conn.check_alive();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(conn, Duration::from_millis(1), Duration::from_millis(1 << 32), cancel2)
                .await
        });

        time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[test]
    fn heartbeat_result_equality() {
        assert_eq!(HeartbeatResult::TimedOut, HeartbeatResult::TimedOut);
        assert_ne!(HeartbeatResult::TimedOut, HeartbeatResult::Cancelled);
    }
}
