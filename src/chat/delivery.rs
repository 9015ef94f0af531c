// Simulated delivery progress for confirmed messages.
//
// Once the server accepts a message the scheduler walks it through
// sent -> delivered -> read on fixed delays. This is advisory progress for
// the UI, not a transport guarantee: ticks are applied by the engine only
// while the message is still tracked, and a lost tick is acceptable.

use std::collections::HashMap;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::models::DeliveryStatus;

/// Delay before a confirmed message is shown as delivered.
pub const DELIVERED_AFTER: Duration = Duration::from_millis(1000);
/// Further delay after delivery before the message is shown as read.
pub const READ_AFTER: Duration = Duration::from_millis(2000);

/// One timer firing. The engine applies it to the active store, if the
/// message is still there and still in the expected predecessor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTick {
    pub message_id: String,
    pub status: DeliveryStatus,
}

impl DeliveryTick {
    /// The status the message must currently hold for this tick to apply.
    /// A tick arriving out of order is dropped by the engine.
    pub fn expected_predecessor(&self) -> DeliveryStatus {
        match self.status {
            DeliveryStatus::Delivered => DeliveryStatus::Sent,
            DeliveryStatus::Read => DeliveryStatus::Delivered,
            // The scheduler only ever emits Delivered and Read.
            other => other,
        }
    }
}

pub struct DeliveryScheduler {
    tick_tx: mpsc::UnboundedSender<DeliveryTick>,
    // One task per in-flight message, keyed by message id so a conversation
    // switch can cancel exactly the timers that are no longer observed.
    timers: HashMap<String, JoinHandle<()>>,
    delivered_after: Duration,
    read_after: Duration,
}

impl DeliveryScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveryTick>) {
        Self::with_delays(DELIVERED_AFTER, READ_AFTER)
    }

    pub fn with_delays(
        delivered_after: Duration,
        read_after: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveryTick>) {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        (
            DeliveryScheduler {
                tick_tx,
                timers: HashMap::new(),
                delivered_after,
                read_after,
            },
            tick_rx,
        )
    }

    /// Start the delivery countdown for a message the server just accepted.
    /// Scheduling the same id again restarts its countdown.
    pub fn schedule(&mut self, message_id: &str) {
        self.cancel(message_id);

        let tx = self.tick_tx.clone();
        let id = message_id.to_string();
        // Deadlines are anchored here, not at first poll, so the contract
        // delays hold no matter when the task gets scheduled.
        let accepted_at = tokio::time::Instant::now();
        let delivered_at = accepted_at + self.delivered_after;
        let read_at = delivered_at + self.read_after;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(delivered_at).await;
            if tx
                .send(DeliveryTick {
                    message_id: id.clone(),
                    status: DeliveryStatus::Delivered,
                })
                .is_err()
            {
                return;
            }
            tokio::time::sleep_until(read_at).await;
            let _ = tx.send(DeliveryTick {
                message_id: id,
                status: DeliveryStatus::Read,
            });
        });

        self.timers.insert(message_id.to_string(), handle);
    }

    /// Cancel the timer for one message, if any is outstanding.
    pub fn cancel(&mut self, message_id: &str) {
        if let Some(handle) = self.timers.remove(message_id) {
            debug!("Cancelling delivery timer for message {}", message_id);
            handle.abort();
        }
    }

    /// Cancel every outstanding timer. Called whenever the active
    /// conversation is switched or closed so a stale timer cannot touch a
    /// freshly loaded history.
    pub fn cancel_all(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        debug!("Cancelling {} outstanding delivery timers", self.timers.len());
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, message_id: &str) -> bool {
        self.timers
            .get(message_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for DeliveryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
