//! Channel registry: delivery handles keyed by flex id type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::FlexIdType;

/// Receipt returned by an outbound gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

/// How a reply reached the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Synchronous channel: the reply goes back as the response body.
    Inline,
    /// Asynchronous channel: the reply was handed to an outbound gateway.
    Sent(DeliveryReceipt),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no delivery path configured for {0} identities")]
    UnsupportedChannel(FlexIdType),
    #[error("outbound gateway failed: {0}")]
    Gateway(String),
}

/// Delivers reply text to one kind of identity.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn flex_id_type(&self) -> FlexIdType;

    async fn deliver(&self, flex_id: &str, text: &str) -> Result<Delivery, DeliveryError>;
}

/// Registry of flex id types to channel handles.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<FlexIdType, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle under its own flex id type, replacing any previous one.
    pub async fn register(&self, handle: Arc<dyn ChannelHandle>) {
        let t = handle.flex_id_type();
        if self.inner.write().await.insert(t, handle).is_some() {
            log::debug!("channels: replaced {} channel", t);
        }
    }

    pub async fn get(&self, t: FlexIdType) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.read().await.get(&t).cloned()
    }
}
