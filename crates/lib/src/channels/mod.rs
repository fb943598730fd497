//! Outbound channels, one per flex id type.
//!
//! Web replies travel back synchronously as the response body; phone replies are sent through
//! an SMS gateway. Types with no registered channel have no delivery path.

mod registry;
mod sms;
mod web;

pub use registry::{ChannelHandle, ChannelRegistry, Delivery, DeliveryError, DeliveryReceipt};
pub use sms::{SmsChannel, SmsGateway, TwilioGateway, TWILIO_API_BASE};
pub use web::WebChannel;
