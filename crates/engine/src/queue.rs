//! Queue processor — polls for due messages on a fixed cadence and fans
//! each out to an independent delivery task, bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::config::QueueConfig;
use courier_store::MessageStore;

use crate::executor::DeliveryExecutor;

/// Polls the message store and drives due messages through the executor.
pub struct QueueProcessor {
    executor: Arc<DeliveryExecutor>,
    store: Arc<MessageStore>,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
}

impl QueueProcessor {
    pub fn new(executor: Arc<DeliveryExecutor>, store: Arc<MessageStore>, config: QueueConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            executor,
            store,
            config,
            semaphore,
        }
    }

    /// Run one poll pass: fetch due messages (oldest scheduled first) and
    /// dispatch each as its own task. One message's failure never aborts
    /// the batch. Returns the number of messages dispatched.
    pub async fn process_queue(&self) -> usize {
        let due = self.store.due_messages(Utc::now(), self.config.batch_size);
        if due.is_empty() {
            return 0;
        }

        let count = due.len();
        info!(count, "processing due messages");
        metrics::counter!("queue.messages_dispatched").increment(count as u64);

        let mut handles = Vec::with_capacity(count);
        for message in due {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let executor = self.executor.clone();
            let message_id = message.id;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = executor.route_message(&message_id).await {
                    warn!(message_id = %message_id, error = %e, "delivery pipeline error");
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                // A panicked worker is isolated; the batch keeps going.
                error!(error = %e, "delivery task aborted");
            }
        }

        count
    }

    /// Scheduler loop: process, then sleep one poll interval, until the
    /// token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            "queue processor started"
        );

        loop {
            let processed = self.process_queue().await;
            metrics::counter!("queue.cycles").increment(1);
            if processed > 0 {
                info!(processed, "poll cycle complete");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
            }
        }

        info!("queue processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_controls::{FrequencyLimiter, ProviderRateLimiter, SuppressionList};
    use courier_core::config::FrequencyConfig;
    use courier_core::message::{ChannelType, Message, MessageStatus};
    use courier_core::routing::ChannelRoutingConfig;
    use courier_providers::{MockProvider, ProviderRegistry};
    use courier_routing::ChannelRouter;
    use courier_store::{AttemptLog, RoutingTable};
    use uuid::Uuid;

    fn build_processor(provider: MockProvider) -> (QueueProcessor, Arc<MessageStore>) {
        let store = Arc::new(MessageStore::new());
        let attempts = Arc::new(AttemptLog::new());
        let table = Arc::new(RoutingTable::new());
        table.upsert(ChannelRoutingConfig::new(ChannelType::Sms, "mock-sms"));

        let registry = Arc::new(ProviderRegistry::new().with(Arc::new(provider)));
        let provider_limits = Arc::new(ProviderRateLimiter::new());
        let router = Arc::new(ChannelRouter::new(
            table,
            registry,
            provider_limits.clone(),
        ));
        let frequency = Arc::new(FrequencyLimiter::new(FrequencyConfig {
            max_per_day: 100,
            max_per_week: 100,
            max_per_month: 100,
        }));
        let suppression = Arc::new(SuppressionList::new());

        let executor = Arc::new(DeliveryExecutor::new(
            store.clone(),
            attempts,
            router,
            frequency,
            provider_limits,
            suppression,
        ));

        // One worker at a time so scripted outcomes land on messages in
        // dispatch order.
        let config = QueueConfig {
            poll_interval_secs: 1,
            batch_size: 50,
            max_concurrency: 1,
        };
        (
            QueueProcessor::new(executor, store.clone(), config),
            store,
        )
    }

    fn due_sms() -> Message {
        let mut msg = Message::queued(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "tenant-1",
            ChannelType::Sms,
            "+15551234567",
        )
        .with_body("hello");
        msg.scheduled_at = Utc::now() - chrono::Duration::seconds(1);
        msg
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop() {
        let (processor, _) = build_processor(
            MockProvider::sms("mock-sms")
                .with_failure_rate(0.0)
                .with_latency(Duration::from_millis(1)),
        );
        assert_eq!(processor.process_queue().await, 0);
    }

    #[tokio::test]
    async fn test_batch_processes_all_due_messages() {
        let (processor, store) = build_processor(
            MockProvider::sms("mock-sms")
                .with_failure_rate(0.0)
                .with_latency(Duration::from_millis(1)),
        );

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.insert(due_sms()));
        }

        assert_eq!(processor.process_queue().await, 5);
        for id in ids {
            assert_eq!(store.get(&id).unwrap().status, MessageStatus::Sent);
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let provider = MockProvider::sms("mock-sms")
            .with_failure_rate(0.0)
            .with_latency(Duration::from_millis(1));
        // First send fails permanently; the rest succeed.
        provider.script_outcome(
            courier_providers::SendOutcome::failed("invalid recipient"),
        );
        let (processor, store) = build_processor(provider);

        // Ordered by scheduled_at, so the failing message goes first.
        let mut failing = due_sms();
        failing.scheduled_at = Utc::now() - chrono::Duration::seconds(60);
        let failing_id = store.insert(failing);
        let ok_id = store.insert(due_sms());

        processor.process_queue().await;

        assert_eq!(store.get(&failing_id).unwrap().status, MessageStatus::Failed);
        assert_eq!(store.get(&ok_id).unwrap().status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_future_messages_not_picked_up() {
        let (processor, store) = build_processor(
            MockProvider::sms("mock-sms")
                .with_failure_rate(0.0)
                .with_latency(Duration::from_millis(1)),
        );

        let mut future = due_sms();
        future.scheduled_at = Utc::now() + chrono::Duration::seconds(600);
        let id = store.insert(future);

        assert_eq!(processor.process_queue().await, 0);
        assert_eq!(store.get(&id).unwrap().status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let (processor, _) = build_processor(
            MockProvider::sms("mock-sms")
                .with_failure_rate(0.0)
                .with_latency(Duration::from_millis(1)),
        );

        let token = CancellationToken::new();
        token.cancel();
        // Returns promptly because the token is already cancelled.
        processor.run(token).await;
    }
}
