//! SMS channel: replies to phone identities go out through an SMS gateway (Twilio by default).

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::registry::{ChannelHandle, Delivery, DeliveryError, DeliveryReceipt};
use crate::types::FlexIdType;

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Outbound SMS collaborator.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<DeliveryReceipt, String>;
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

/// Twilio Messages API client (form POST with account SID / auth token basic auth).
pub struct TwilioGateway {
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioGateway {
    pub fn new(
        api_base: Option<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| TWILIO_API_BASE.to_string());
        Self {
            api_base,
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send_sms(&self, to: &str, body: &str) -> Result<DeliveryReceipt, String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        let res = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("sendSms failed: {} {}", status, body));
        }
        let data: TwilioMessageResponse = res.json().await.map_err(|e| e.to_string())?;
        Ok(DeliveryReceipt {
            id: data.sid,
            status: data.status.unwrap_or_default(),
        })
    }
}

/// Phone identities: the flex id is the destination number.
pub struct SmsChannel {
    gateway: Arc<dyn SmsGateway>,
}

impl SmsChannel {
    pub fn new(gateway: Arc<dyn SmsGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ChannelHandle for SmsChannel {
    fn flex_id_type(&self) -> FlexIdType {
        FlexIdType::Phone
    }

    async fn deliver(&self, flex_id: &str, text: &str) -> Result<Delivery, DeliveryError> {
        let receipt = self
            .gateway
            .send_sms(flex_id, text)
            .await
            .map_err(DeliveryError::Gateway)?;
        log::debug!("sms: delivered to {} ({})", flex_id, receipt.id);
        Ok(Delivery::Sent(receipt))
    }
}
