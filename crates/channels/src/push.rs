//! Web-push delivery.
//!
//! Wraps the Web Push protocol handshake: aes128gcm payload encryption
//! against the subscription keys, optional VAPID signing, and collapsing
//! the provider's error space into the dispatcher's taxonomy.

use async_trait::async_trait;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, URL_SAFE_NO_PAD,
    VapidSignatureBuilder, WebPushClient, WebPushError, WebPushMessageBuilder,
};

use relay_common::types::WebPushSubscription;

use crate::ChannelError;

/// A web-push send primitive. The real implementation talks to the push
/// provider; tests substitute their own.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// One delivery attempt. The payload is the reminder as JSON; the call
    /// is bounded by the underlying client's request timeout.
    async fn send(
        &self,
        subscription: &WebPushSubscription,
        payload: &[u8],
    ) -> Result<(), ChannelError>;
}

/// Web-push adapter backed by the provider HTTP protocol.
pub struct WebPushChannel {
    client: IsahcWebPushClient,
    /// Base64 VAPID private key. When absent, requests go out unsigned and
    /// some providers will reject them; startup logs the degradation.
    vapid_private_key: Option<String>,
}

impl WebPushChannel {
    pub fn new(vapid_private_key: Option<String>) -> Result<Self, ChannelError> {
        let client =
            IsahcWebPushClient::new().map_err(|e| ChannelError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            vapid_private_key,
        })
    }
}

#[async_trait]
impl PushChannel for WebPushChannel {
    async fn send(
        &self,
        subscription: &WebPushSubscription,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);

        if let Some(key) = &self.vapid_private_key {
            let signature = VapidSignatureBuilder::from_base64(key, URL_SAFE_NO_PAD, &info)
                .and_then(|b| b.build())
                .map_err(|e| ChannelError::Provider(format!("vapid signature: {e}")))?;
            builder.set_vapid_signature(signature);
        }

        let message = builder
            .build()
            .map_err(|e| ChannelError::Provider(e.to_string()))?;

        self.client.send(message).await.map_err(classify)?;

        tracing::debug!(endpoint = %subscription.endpoint, "Push accepted by provider");
        Ok(())
    }
}

/// Collapse the provider error space into the dispatcher's taxonomy.
/// Invalid and not-found endpoints both mean the registration is dead.
fn classify(err: WebPushError) -> ChannelError {
    match err {
        WebPushError::EndpointNotValid | WebPushError::EndpointNotFound => ChannelError::Gone,
        other => ChannelError::Provider(other.to_string()),
    }
}
