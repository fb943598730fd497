//! Response routing: deliver a computed reply over the channel the request arrived on.
//!
//! Delivery never invalidates the reply. Callers get the reply text back regardless and learn
//! only whether delivery succeeded.

use std::sync::Arc;

use crate::channels::{ChannelHandle, ChannelRegistry, Delivery, DeliveryError, WebChannel};
use crate::types::FlexIdentity;

pub struct ResponseRouter {
    channels: Arc<ChannelRegistry>,
}

impl ResponseRouter {
    pub fn new(channels: Arc<ChannelRegistry>) -> Self {
        Self { channels }
    }

    /// Router with only the synchronous web channel.
    pub async fn web_only() -> Self {
        let channels = Arc::new(ChannelRegistry::new());
        channels.register(Arc::new(WebChannel)).await;
        Self::new(channels)
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Send `reply` to `identity`. Fails with `UnsupportedChannel` when no channel handles the
    /// identity's type.
    pub async fn deliver(
        &self,
        identity: &FlexIdentity,
        reply: &str,
    ) -> Result<Delivery, DeliveryError> {
        let handle: Arc<dyn ChannelHandle> = self
            .channels
            .get(identity.flex_id_type)
            .await
            .ok_or(DeliveryError::UnsupportedChannel(identity.flex_id_type))?;
        handle.deliver(&identity.flex_id, reply).await
    }
}
