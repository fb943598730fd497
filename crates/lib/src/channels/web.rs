//! Web channel: synchronous, the reply is the HTTP response body.

use async_trait::async_trait;

use super::registry::{ChannelHandle, Delivery, DeliveryError};
use crate::types::FlexIdType;

#[derive(Debug, Default)]
pub struct WebChannel;

#[async_trait]
impl ChannelHandle for WebChannel {
    fn flex_id_type(&self) -> FlexIdType {
        FlexIdType::Web
    }

    async fn deliver(&self, _flex_id: &str, _text: &str) -> Result<Delivery, DeliveryError> {
        Ok(Delivery::Inline)
    }
}
