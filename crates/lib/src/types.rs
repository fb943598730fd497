//! Values that flow through the dispatch pipeline: caller identity, classified input,
//! conversational context, the message handed to a skill package, and its outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// User id reserved for callers that could not be resolved.
pub const ANONYMOUS_USER_ID: u64 = 0;

/// Channel a flex identity belongs to. Wire codes match the numeric `flexidtype` form field.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlexIdType {
    Web,
    Phone,
    Email,
}

impl FlexIdType {
    pub fn code(self) -> u8 {
        match self {
            FlexIdType::Web => 1,
            FlexIdType::Phone => 2,
            FlexIdType::Email => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FlexIdType::Web),
            2 => Some(FlexIdType::Phone),
            3 => Some(FlexIdType::Email),
            _ => None,
        }
    }
}

impl fmt::Display for FlexIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlexIdType::Web => "web",
            FlexIdType::Phone => "phone",
            FlexIdType::Email => "email",
        };
        f.write_str(s)
    }
}

/// Accepts either the numeric code ("2") or the name ("phone", case-insensitive).
impl FromStr for FlexIdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if let Ok(code) = t.parse::<u8>() {
            return FlexIdType::from_code(code).ok_or_else(|| format!("unknown flex id type code: {}", code));
        }
        match t.to_ascii_lowercase().as_str() {
            "web" => Ok(FlexIdType::Web),
            "phone" | "sms" => Ok(FlexIdType::Phone),
            "email" => Ok(FlexIdType::Email),
            other => Err(format!("unknown flex id type: {}", other)),
        }
    }
}

/// A caller as seen by one channel (phone number, web session token, ...).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlexIdentity {
    pub flex_id: String,
    pub flex_id_type: FlexIdType,
}

impl FlexIdentity {
    pub fn new(flex_id: impl Into<String>, flex_id_type: FlexIdType) -> Self {
        Self {
            flex_id: flex_id.into(),
            flex_id_type,
        }
    }

    pub fn web(flex_id: impl Into<String>) -> Self {
        Self::new(flex_id, FlexIdType::Web)
    }

    pub fn phone(flex_id: impl Into<String>) -> Self {
        Self::new(flex_id, FlexIdType::Phone)
    }
}

impl fmt::Display for FlexIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.flex_id_type, self.flex_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER_ID,
            display_name: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER_ID
    }
}

/// Classifier output for one inbound message. `intent_label` is None when no label cleared
/// the confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredInput {
    pub intent_label: Option<String>,
    pub confidence: f64,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub slots: HashMap<String, String>,
}

impl StructuredInput {
    pub fn classified(label: impl Into<String>, confidence: f64, raw_text: impl Into<String>) -> Self {
        Self {
            intent_label: Some(label.into()),
            confidence,
            raw_text: raw_text.into(),
            slots: HashMap::new(),
        }
    }

    pub fn unclassified(confidence: f64, raw_text: impl Into<String>) -> Self {
        Self {
            intent_label: None,
            confidence,
            raw_text: raw_text.into(),
            slots: HashMap::new(),
        }
    }

    pub fn is_classified(&self) -> bool {
        self.intent_label.is_some()
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent_label.as_deref()
    }
}

/// Short-lived conversational state for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub user_id: u64,
    pub last_intent: Option<String>,
    pub last_package: Option<String>,
    pub last_route: Option<String>,
    #[serde(default)]
    pub pending_slots: HashMap<String, String>,
    /// Sequence number of the turn that committed this context (0 = never committed).
    pub turn: u64,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Context {
    pub fn empty(user_id: u64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            last_intent: None,
            last_package: None,
            last_route: None,
            pending_slots: HashMap::new(),
            turn: 0,
            updated_at: now,
            expires_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_empty(&self) -> bool {
        self.last_intent.is_none()
            && self.last_package.is_none()
            && self.last_route.is_none()
            && self.pending_slots.is_empty()
    }
}

/// What a skill package receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub user: User,
    pub input: StructuredInput,
    pub context: Context,
}

/// Why a dispatch attempt did not produce a skill reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeError {
    #[error("missing package")]
    MissingPackage,
    #[error("skill invocation timed out")]
    Timeout,
    #[error("skill transport failed")]
    Transport,
    #[error("skill returned an error")]
    Remote,
}

/// Result of one dispatch attempt; also the response body of a skill invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    #[serde(default)]
    pub reply_text: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    /// Slots the package still needs; carried in context to the next turn.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pending_slots: HashMap<String, String>,
}

impl DispatchOutcome {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply_text: text.into(),
            ..Self::default()
        }
    }

    /// Outcome for a turn that fell back to the canned reply.
    pub fn fallback(
        reply: impl Into<String>,
        package_name: impl Into<String>,
        route: impl Into<String>,
        error: OutcomeError,
    ) -> Self {
        Self {
            reply_text: reply.into(),
            package_name: package_name.into(),
            route: route.into(),
            error: Some(error),
            pending_slots: HashMap::new(),
        }
    }

    pub fn with_pending_slot(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pending_slots.insert(key.into(), value.into());
        self
    }
}
