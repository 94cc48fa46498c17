//! The provider-adapter trait consumed by the channel router and the
//! delivery executor.

use async_trait::async_trait;

use courier_core::message::{ChannelType, Message};
use courier_core::CourierResult;

/// Content handed to an adapter for one send.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub media_urls: Vec<String>,
}

impl From<&Message> for MessageContent {
    fn from(message: &Message) -> Self {
        Self {
            subject: message.subject.clone(),
            body: message.body.clone(),
            html_body: message.html_body.clone(),
            media_urls: message.media_urls.clone(),
        }
    }
}

/// Vendor response for one send call.
///
/// Vendor-level rejections come back in-band (`success == false`);
/// transport-level faults surface as a `CourierError` from the adapter.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub cost: Option<f64>,
}

impl SendOutcome {
    pub fn ok(external_id: impl Into<String>, cost: f64) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.into()),
            error: None,
            error_code: None,
            cost: Some(cost),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error.into()),
            error_code: None,
            cost: None,
        }
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }
}

/// Vendor-side delivery confirmation for a previously accepted message.
#[derive(Debug, Clone)]
pub struct DeliveryStatus {
    pub delivered: bool,
    pub error: Option<String>,
}

/// An external vendor integration for one channel.
///
/// Implementations are registered by name in the [`crate::ProviderRegistry`]
/// at startup and looked up by the channel router.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key, e.g. `"mock-sms"`.
    fn name(&self) -> &str;

    fn channel(&self) -> ChannelType;

    /// Estimated cost of sending `content`, used by cost-optimized routing
    /// before any send is attempted.
    fn estimated_cost(&self, content: &MessageContent) -> f64;

    /// Perform one send. The call is the engine's suspension point; any
    /// timeout enforced here is reported as a transient failure.
    async fn send(&self, recipient: &str, content: &MessageContent) -> CourierResult<SendOutcome>;

    /// Poll the vendor for delivery confirmation of an accepted message.
    async fn delivery_status(&self, external_id: &str) -> CourierResult<DeliveryStatus>;
}
