//! End-to-end delivery scenarios: retry exhaustion, fallback logging,
//! suppression gating, and delivery-status confirmation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use courier_controls::{
    ApiRateLimiter, FrequencyLimiter, ProviderRateLimiter, SuppressionList, SuppressionReason,
};
use courier_core::config::{FrequencyConfig, QueueConfig};
use courier_core::limits::ApiRateLimit;
use courier_core::message::{ChannelType, FallbackReason, Message, MessageStatus};
use courier_core::routing::{ChannelRoutingConfig, RetryStrategy};
use courier_engine::{DeliveryExecutor, DeliveryService, QueueProcessor};
use courier_providers::{DeliveryStatus, MockProvider, ProviderRegistry, SendOutcome};
use courier_routing::ChannelRouter;
use courier_store::{AttemptLog, MessageStore, RoutingTable};

struct Harness {
    store: Arc<MessageStore>,
    attempts: Arc<AttemptLog>,
    provider_limits: Arc<ProviderRateLimiter>,
    api_limits: Arc<ApiRateLimiter>,
    suppression: Arc<SuppressionList>,
    executor: Arc<DeliveryExecutor>,
    service: DeliveryService,
    processor: QueueProcessor,
    primary: Arc<MockProvider>,
    fallback: Arc<MockProvider>,
}

fn harness(config: ChannelRoutingConfig) -> Harness {
    let store = Arc::new(MessageStore::new());
    let attempts = Arc::new(AttemptLog::new());
    let table = Arc::new(RoutingTable::new());
    table.upsert(config);

    let primary = Arc::new(
        MockProvider::sms("sms-primary")
            .with_failure_rate(0.0)
            .with_latency(Duration::from_millis(1)),
    );
    let fallback = Arc::new(
        MockProvider::sms("sms-backup")
            .with_failure_rate(0.0)
            .with_latency(Duration::from_millis(1)),
    );

    let registry = Arc::new(
        ProviderRegistry::new()
            .with(primary.clone())
            .with(fallback.clone()),
    );
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
        attempts.clone(),
        router,
        frequency,
        provider_limits.clone(),
        suppression.clone(),
    ));

    let processor = QueueProcessor::new(
        executor.clone(),
        store.clone(),
        QueueConfig {
            poll_interval_secs: 1,
            batch_size: 50,
            max_concurrency: 4,
        },
    );

    let api_limits = Arc::new(ApiRateLimiter::new());
    let service = DeliveryService::new(executor.clone(), attempts.clone(), api_limits.clone());

    Harness {
        store,
        attempts,
        provider_limits,
        api_limits,
        suppression,
        executor,
        service,
        processor,
        primary,
        fallback,
    }
}

fn due_sms(max_retries: u32) -> Message {
    let mut msg = Message::queued(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "tenant-1",
        ChannelType::Sms,
        "+15551234567",
    )
    .with_body("hello")
    .with_max_retries(max_retries);
    msg.scheduled_at = Utc::now() - chrono::Duration::seconds(1);
    msg
}

/// Force a retry-pending message to be due now.
fn make_due(store: &MessageStore, id: &Uuid) {
    store
        .update(id, |m| m.scheduled_at = Utc::now() - chrono::Duration::seconds(1))
        .unwrap();
}

#[tokio::test]
async fn test_transient_failures_exhaust_retry_budget() {
    // SMS, primary fails with transient timeouts, fallback disabled,
    // max_retries = 2, fixed 30s delay.
    let h = harness(
        ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary").with_retry(
            RetryStrategy::Fixed,
            30,
            300,
        ),
    );
    for _ in 0..3 {
        h.primary
            .script_outcome(SendOutcome::failed("connection timeout"));
    }

    let id = h.store.insert(due_sms(2));

    // Attempt 1: failed, scheduled for retry in ~30s.
    h.processor.process_queue().await;
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::PendingRetry);
    assert_eq!(msg.retry_count, 1);
    let delay = (msg.scheduled_at - Utc::now()).num_seconds();
    assert!((28..=30).contains(&delay), "delay was {delay}s");

    // Not due yet: nothing processed.
    assert_eq!(h.processor.process_queue().await, 0);

    // Attempt 2: failed, one retry left.
    make_due(&h.store, &id);
    h.processor.process_queue().await;
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::PendingRetry);
    assert_eq!(msg.retry_count, 2);

    // Attempt 3: budget exhausted, terminal failure.
    make_due(&h.store, &id);
    h.processor.process_queue().await;
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::Failed);
    assert_eq!(msg.retry_count, 2);
    assert!(msg.retry_count <= msg.max_retries);
    assert_eq!(msg.error_message.as_deref(), Some("connection timeout"));

    // Attempt numbers form a contiguous 1-based sequence.
    let numbers: Vec<u32> = h
        .attempts
        .for_message(&id)
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_fallback_logs_two_attempts_with_reason() {
    let h = harness(
        ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary").with_fallback("sms-backup"),
    );
    h.primary
        .script_outcome(SendOutcome::failed("provider unavailable"));

    let id = h.store.insert(due_sms(3));
    let outcome = h.executor.route_message(&id).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempt_number, 2);
    assert_eq!(h.store.get(&id).unwrap().status, MessageStatus::Sent);

    let rows = h.attempts.for_message(&id);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].provider_name, "sms-primary");
    assert!(!rows[0].success);
    assert!(rows[0].fallback_reason.is_none());
    assert_eq!(rows[1].provider_name, "sms-backup");
    assert!(rows[1].success);
    assert_eq!(rows[1].fallback_reason, Some(FallbackReason::ProviderDown));
}

#[tokio::test]
async fn test_fallback_not_attempted_when_disabled() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    h.primary
        .script_outcome(SendOutcome::failed("provider unavailable"));
    h.fallback.script_outcome(SendOutcome::ok("SHOULD_NOT_SEND", 0.0));

    let id = h.store.insert(due_sms(0));
    let outcome = h.executor.route_message(&id).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(h.attempts.for_message(&id).len(), 1);
    assert_eq!(h.store.get(&id).unwrap().status, MessageStatus::Failed);
}

#[tokio::test]
async fn test_suppressed_contact_is_never_delivered() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    h.suppression
        .add("+15551234567", SuppressionReason::UserOptOut, None);

    let id = h.store.insert(due_sms(3));
    let outcome = h.executor.route_message(&id).await.unwrap();

    assert!(!outcome.success);
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::Failed);
    assert!(msg.error_message.unwrap().contains("suppressed"));

    // No attempt rows and no provider rate-limit slot consumed.
    assert!(h.attempts.for_message(&id).is_empty());
    assert!(h.provider_limits.status("sms-primary", "sms").is_none());
}

#[tokio::test]
async fn test_permanent_rejection_never_retried() {
    let h = harness(
        ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary").with_retry(
            RetryStrategy::Fixed,
            30,
            300,
        ),
    );
    h.primary
        .script_outcome(SendOutcome::failed("invalid recipient"));

    // Plenty of retry budget left; the rejection still terminates.
    let id = h.store.insert(due_sms(5));
    let outcome = h.executor.route_message(&id).await.unwrap();

    assert!(!outcome.success);
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::Failed);
    assert_eq!(msg.retry_count, 0);
    assert_eq!(h.attempts.for_message(&id).len(), 1);
}

#[tokio::test]
async fn test_provider_rate_limit_denial_schedules_retry() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    h.provider_limits.set_limit("sms-primary", "sms", 0, 60);

    let id = h.store.insert(due_sms(3));
    let outcome = h.executor.route_message(&id).await.unwrap();

    assert!(!outcome.success);
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::PendingRetry);
    assert_eq!(msg.retry_count, 1);
    // Delay comes from the limiter's retry-after hint (full window).
    let delay = (msg.scheduled_at - Utc::now()).num_seconds();
    assert!((58..=60).contains(&delay), "delay was {delay}s");

    let rows = h.attempts.for_message(&id);
    assert_eq!(rows.len(), 1);
    assert!(rows[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("rate limit"));
}

#[tokio::test]
async fn test_missing_routing_config_fails_message() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));

    let mut msg = due_sms(3);
    msg.channel = ChannelType::Email;
    msg.recipient = "user@example.com".to_string();
    let id = h.store.insert(msg);

    let outcome = h.executor.route_message(&id).await.unwrap();
    assert!(!outcome.success);

    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::Failed);
    assert!(msg
        .error_message
        .unwrap()
        .contains("no active routing config"));
}

#[tokio::test]
async fn test_sent_message_confirms_delivered() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));

    let id = h.store.insert(due_sms(3));
    let outcome = h.executor.route_message(&id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(h.store.get(&id).unwrap().status, MessageStatus::Sent);

    h.primary.script_delivery_status(DeliveryStatus {
        delivered: true,
        error: None,
    });
    let refreshed = h.executor.refresh_delivery_status(&id).await.unwrap();
    assert_eq!(refreshed.status, MessageStatus::Delivered);
    assert!(refreshed.delivered_at.is_some());
}

#[tokio::test]
async fn test_cancelled_message_is_not_attempted() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));

    let id = h.store.insert(due_sms(3));
    h.executor.cancel(&id).unwrap();

    assert_eq!(h.processor.process_queue().await, 0);
    let msg = h.store.get(&id).unwrap();
    assert_eq!(msg.status, MessageStatus::Cancelled);
    assert!(h.attempts.for_message(&id).is_empty());
}

#[tokio::test]
async fn test_manual_retry_requeues_and_redelivers() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    h.primary
        .script_outcome(SendOutcome::failed("invalid recipient"));

    let id = h.store.insert(due_sms(3));
    h.executor.route_message(&id).await.unwrap();
    assert_eq!(h.store.get(&id).unwrap().status, MessageStatus::Failed);

    let requeued = h.executor.retry_failed(&id).unwrap();
    assert_eq!(requeued.status, MessageStatus::Queued);
    assert_eq!(requeued.retry_count, 1);

    // Redelivery succeeds this time.
    let outcome = h.executor.route_message(&id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(h.store.get(&id).unwrap().status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_service_denies_send_over_api_limit() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    h.api_limits
        .add_rule(ApiRateLimit::new("/api/messages/*", 1, 60).for_tenant("tenant-1"));

    let first = h.store.insert(due_sms(3));
    let second = h.store.insert(due_sms(3));

    let outcome = h
        .service
        .route_message("user-1", Some("tenant-1"), &first)
        .await
        .unwrap();
    assert!(outcome.success);

    // Budget exhausted: the second send is denied and the message stays
    // queued, with a violation row recorded.
    let denied = h
        .service
        .route_message("user-1", Some("tenant-1"), &second)
        .await
        .unwrap();
    assert!(!denied.success);
    assert!(denied.error.unwrap().contains("api rate limit"));
    assert_eq!(h.store.get(&second).unwrap().status, MessageStatus::Queued);
    assert_eq!(h.service.rate_limit_violations(10).len(), 1);
}

#[tokio::test]
async fn test_service_admin_reads_reflect_state() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));

    let id = h.store.insert(due_sms(3));
    let msg = h.store.get(&id).unwrap();
    h.service
        .route_message("user-1", Some("tenant-1"), &id)
        .await
        .unwrap();

    assert_eq!(h.service.attempt_history(&id).len(), 1);

    let stats = h
        .service
        .channel_stats(ChannelType::Sms, Utc::now() - chrono::Duration::hours(1));
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.successful_attempts, 1);

    let freq = h
        .service
        .frequency_status(msg.contact_id, "tenant-1")
        .unwrap();
    assert_eq!(freq.sent_today, 1);

    let provider = h
        .service
        .provider_limit_status("sms-primary", "sms")
        .unwrap();
    assert_eq!(provider.current_count, 1);
}

#[tokio::test]
async fn test_delivery_report_aggregates_campaign() {
    let h = harness(ChannelRoutingConfig::new(ChannelType::Sms, "sms-primary"));
    let campaign_id = Uuid::new_v4();

    let mut sent = due_sms(3);
    sent.campaign_id = campaign_id;
    let sent_id = h.store.insert(sent);
    h.executor.route_message(&sent_id).await.unwrap();

    let mut queued = due_sms(3);
    queued.campaign_id = campaign_id;
    queued.scheduled_at = Utc::now() + chrono::Duration::hours(1);
    h.store.insert(queued);

    let report = h.executor.delivery_report(&campaign_id);
    assert_eq!(report.total, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.queued, 1);
    assert!(report.total_cost > 0.0);
}
