//! Chat fan-out to every registered connection.

use std::sync::Arc;

use tracing::{debug, warn};

use super::message::RelayMessage;
use super::registry::ConnectionRegistry;
use crate::ids::ConnectionId;
use crate::metrics::{RELAY_DELIVERIES_TOTAL, RELAY_DELIVERY_FAILURES_TOTAL, RELAY_MESSAGES_TOTAL};

/// Whether a sender receives its own broadcasts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Deliver to every registered connection except the sender.
    #[default]
    ExcludeSender,
    /// Deliver to every registered connection, the sender included.
    IncludeSender,
}

impl EchoPolicy {
    /// Map the `echo_to_sender` setting onto a policy.
    pub fn from_echo_flag(echo_to_sender: bool) -> Self {
        if echo_to_sender {
            Self::IncludeSender
        } else {
            Self::ExcludeSender
        }
    }
}

/// Per-broadcast delivery summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was addressed to.
    pub recipients: usize,
    /// Messages queued successfully.
    pub delivered: usize,
    /// Recipients skipped because their queue was full or closed.
    pub failed: usize,
}

/// Relays chat messages to the registered connections.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    echo: EchoPolicy,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, echo: EchoPolicy) -> Self {
        Self { registry, echo }
    }

    /// The registry this broadcaster reads from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Queue `message` on every registered connection, honoring the echo
    /// policy for `origin`.
    ///
    /// Recipients come from a registry snapshot taken at call time. Each
    /// enqueue is non-blocking: a recipient whose queue is full or closed
    /// misses this message, is logged, and never delays the others or the
    /// sender. Per-recipient order is kept because each writer drains its
    /// queue in order.
    pub fn broadcast(
        &self,
        message: &RelayMessage,
        origin: Option<&ConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        metrics::counter!(RELAY_MESSAGES_TOTAL).increment(1);

        for conn in self.registry.snapshot() {
            if self.echo == EchoPolicy::ExcludeSender && origin == Some(conn.id()) {
                continue;
            }
            report.recipients += 1;
            match conn.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!(RELAY_DELIVERY_FAILURES_TOTAL, "error_kind" => e.error_kind())
                        .increment(1);
                    warn!(
                        recipient = %conn.id(),
                        error_kind = e.error_kind(),
                        error = %e,
                        "failed to relay message to client"
                    );
                }
            }
        }

        metrics::counter!(RELAY_DELIVERIES_TOTAL).increment(report.delivered as u64);
        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            bytes = message.len(),
            "relayed message"
        );
        report
    }
}
