//! Outbound message domain types — the unit of work the delivery engine
//! pushes through channel routing, throttling, and retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery medium for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Sms,
    Mms,
    Email,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Sms => "sms",
            ChannelType::Mms => "mms",
            ChannelType::Email => "email",
        }
    }
}

/// Lifecycle status of a message.
///
/// `PendingRetry` is transient: the queue processor re-enters `Sending`
/// once the scheduled re-attempt time has passed. `Delivered`, `Failed`,
/// and `Cancelled` are terminal and never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    PendingRetry,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }
}

/// A queued outbound communication owned by a campaign.
///
/// Mutated by the delivery executor on every attempt; never physically
/// deleted (`deleted` is a soft-delete flag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub tenant_id: String,
    pub channel: ChannelType,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub media_urls: Vec<String>,
    pub status: MessageStatus,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Provider-assigned message id, set on a successful send.
    pub external_id: Option<String>,
    pub cost: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message in `Queued` state, scheduled immediately.
    pub fn queued(
        campaign_id: Uuid,
        contact_id: Uuid,
        tenant_id: impl Into<String>,
        channel: ChannelType,
        recipient: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id,
            tenant_id: tenant_id.into(),
            channel,
            recipient: recipient.into(),
            subject: None,
            body: None,
            html_body: None,
            media_urls: Vec::new(),
            status: MessageStatus::Queued,
            scheduled_at: now,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            external_id: None,
            cost: 0.0,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Why a delivery attempt went through the fallback provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    ProviderDown,
    RateLimited,
    CostExceeded,
    Manual,
}

/// Immutable audit record of one delivery attempt.
///
/// Attempt numbers for a message are 1-based and contiguous; rows are
/// created once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub attempt_number: u32,
    pub channel: ChannelType,
    pub provider_name: String,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub cost: Option<f64>,
    pub response_time_ms: u64,
    pub fallback_reason: Option<FallbackReason>,
}
