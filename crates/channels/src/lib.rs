//! Delivery channel adapters: web-push and SMS.
//!
//! Thin send primitives over the external providers. The only failure
//! distinction the dispatcher needs is "endpoint permanently gone" versus
//! everything else; `ChannelError` encodes exactly that.

pub mod push;
pub mod sms;

use thiserror::Error;

/// Failure taxonomy of one delivery attempt.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The provider reported the push endpoint permanently invalid
    /// (HTTP 410 equivalent). The subscription can never succeed again.
    #[error("push endpoint is gone")]
    Gone,

    /// Any other provider-side failure: timeout, 5xx, rejected request.
    #[error("provider error: {0}")]
    Provider(String),
}

pub use push::{PushChannel, WebPushChannel};
pub use sms::TwilioSender;
