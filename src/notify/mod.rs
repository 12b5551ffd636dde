//! Best-effort notification outbox.
//!
//! Harvesters never talk to a notification transport directly: they emit
//! events into an [`Outbox`], and an independent consumer task delivers
//! them through a [`Notifier`] with bounded retry. Delivery failures are
//! logged and dropped; they can never affect harvesting correctness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delivery attempts per event (initial try + retries).
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Pause between delivery attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Notification delivery failed.
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound notification transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one message.
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Default notifier that writes messages to the log instead of an external
/// transport. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(subject = %subject, body = %body, "notification");
        Ok(())
    }
}

/// One queued notification.
#[derive(Debug, Clone)]
struct Event {
    subject: String,
    body: String,
}

/// Sending half of the notification outbox.
///
/// Cloneable and cheap; `send` never blocks and never fails from the
/// caller's point of view. The consumer task ends once every clone has
/// been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Event>,
}

impl Outbox {
    /// Spawns the consumer task and returns the outbox plus its join
    /// handle. Await the handle after dropping all outbox clones to flush
    /// pending events before exit.
    #[must_use]
    pub fn spawn(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(notifier.as_ref(), &event).await;
            }
        });

        (Self { tx }, handle)
    }

    /// Queues a notification. Failures to enqueue (consumer gone) are
    /// logged and swallowed.
    pub fn send(&self, subject: impl Into<String>, body: impl Into<String>) {
        let event = Event {
            subject: subject.into(),
            body: body.into(),
        };
        if self.tx.send(event).is_err() {
            warn!("notification outbox consumer is gone; dropping event");
        }
    }
}

async fn deliver(notifier: &dyn Notifier, event: &Event) {
    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        match notifier.notify(&event.subject, &event.body).await {
            Ok(()) => return,
            Err(error) if attempt < MAX_DELIVERY_ATTEMPTS => {
                debug!(
                    subject = %event.subject,
                    attempt,
                    error = %error,
                    "notification delivery failed; retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(error) => {
                warn!(
                    subject = %event.subject,
                    error = %error,
                    "notification delivery failed after {MAX_DELIVERY_ATTEMPTS} attempts; dropping"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingNotifier {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, subject: &str, _body: &str) -> Result<(), NotifyError> {
            self.delivered.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    struct FlakyNotifier {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), NotifyError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(NotifyError("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), NotifyError> {
            Err(NotifyError("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_outbox_delivers_events_in_order() {
        let notifier = Arc::new(RecordingNotifier {
            delivered: Mutex::new(Vec::new()),
        });
        let (outbox, handle) = Outbox::spawn(notifier.clone());

        outbox.send("first", "a");
        outbox.send("second", "b");
        drop(outbox);
        handle.await.unwrap();

        let delivered = notifier.delivered.lock().unwrap();
        assert_eq!(delivered.as_slice(), ["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_retries_transient_failures() {
        let notifier = Arc::new(FlakyNotifier {
            attempts: AtomicU32::new(0),
        });
        let (outbox, handle) = Outbox::spawn(notifier.clone());

        outbox.send("subject", "body");
        drop(outbox);
        handle.await.unwrap();

        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_drops_after_exhausted_retries() {
        let (outbox, handle) = Outbox::spawn(Arc::new(FailingNotifier));

        outbox.send("subject", "body");
        drop(outbox);
        // Consumer must terminate even when every delivery fails.
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_consumer_gone_is_swallowed() {
        let (outbox, handle) = Outbox::spawn(Arc::new(LogNotifier));
        handle.abort();
        let _ = handle.await;

        // Must not panic or error.
        outbox.send("late", "event");
    }
}
