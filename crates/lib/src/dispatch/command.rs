//! Inbound command and the training pseudo-command convention.

use crate::types::FlexIdentity;

pub const DEFAULT_TRAINING_KEYWORD: &str = "train";

/// One inbound message as the request layer hands it over.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub text: String,
    pub identity: FlexIdentity,
    /// Pre-resolved user id, when the caller already knows it.
    pub user_id: Option<u64>,
    /// Explicit route; takes precedence over the classified intent.
    pub route: Option<String>,
}

impl InboundRequest {
    pub fn new(text: impl Into<String>, identity: FlexIdentity) -> Self {
        Self {
            text: text.into(),
            identity,
            user_id: None,
            route: None,
        }
    }

    pub fn with_user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }
}

/// How the dispatcher should treat the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind<'a> {
    /// `train <label>: <example>`
    Train { label: &'a str, example: &'a str },
    /// Keyword present but not followed by `label: example`.
    MalformedTrain,
    Dispatch,
}

/// The keyword matches case-insensitively and must be followed by whitespace, so "trainer"
/// is an ordinary command.
pub fn parse_command<'a>(text: &'a str, keyword: &str) -> CommandKind<'a> {
    let t = text.trim_start();
    let k = keyword.len();
    if k == 0 || t.len() <= k || !t.is_char_boundary(k) || !t[..k].eq_ignore_ascii_case(keyword) {
        return CommandKind::Dispatch;
    }
    let rest = &t[k..];
    if !rest.starts_with(char::is_whitespace) {
        return CommandKind::Dispatch;
    }
    let Some((label, example)) = rest.split_once(':') else {
        return CommandKind::MalformedTrain;
    };
    let (label, example) = (label.trim(), example.trim());
    if label.is_empty() || example.is_empty() {
        return CommandKind::MalformedTrain;
    }
    CommandKind::Train { label, example }
}
