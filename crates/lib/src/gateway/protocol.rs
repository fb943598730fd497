//! Gateway wire types: the inbound command forms and the RPC request/response envelope.

use serde::{Deserialize, Serialize};

use crate::packages::PackageDescriptor;
use crate::types::FlexIdType;

/// `POST /` form: one inbound command from the web front end.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandForm {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub flexid: String,
    /// Numeric code or name; web when absent.
    #[serde(default)]
    pub flexidtype: Option<String>,
    /// Pre-resolved user id. Kept as text so a blank field is not a form error.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
}

/// `POST /twilio` form (the subset of Twilio's inbound SMS webhook we use).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwilioForm {
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "From", default)]
    pub from: String,
}

/// RPC request: `{ "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// RPC response: `{ "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Flex id type as sent over RPC: the numeric code or the name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireFlexIdType {
    Code(u8),
    Name(String),
}

impl WireFlexIdType {
    pub fn resolve(&self) -> Result<FlexIdType, String> {
        match self {
            WireFlexIdType::Code(c) => {
                FlexIdType::from_code(*c).ok_or_else(|| format!("unknown flex id type code: {}", c))
            }
            WireFlexIdType::Name(n) => n.parse(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveUserParams {
    pub flex_id: String,
    pub flex_id_type: WireFlexIdType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkIdentityParams {
    pub user_id: u64,
    pub flex_id: String,
    pub flex_id_type: WireFlexIdType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdParams {
    pub user_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyParams {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterParams {
    pub descriptor: PackageDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeregisterParams {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_id_type_accepts_code_or_name() {
        let p: ResolveUserParams =
            serde_json::from_str(r#"{"flexId":"+1555","flexIdType":2}"#).unwrap();
        assert_eq!(p.flex_id_type.resolve(), Ok(FlexIdType::Phone));
        let p: ResolveUserParams =
            serde_json::from_str(r#"{"flexId":"abc","flexIdType":"web"}"#).unwrap();
        assert_eq!(p.flex_id_type.resolve(), Ok(FlexIdType::Web));
        let p: ResolveUserParams =
            serde_json::from_str(r#"{"flexId":"abc","flexIdType":9}"#).unwrap();
        assert!(p.flex_id_type.resolve().is_err());
    }

    #[test]
    fn response_omits_absent_fields() {
        let ok = serde_json::to_value(RpcResponse::ok("1", serde_json::json!({"a": 1}))).unwrap();
        assert_eq!(ok, serde_json::json!({"id": "1", "ok": true, "payload": {"a": 1}}));
        let err = serde_json::to_value(RpcResponse::err("2", "nope")).unwrap();
        assert_eq!(err, serde_json::json!({"id": "2", "ok": false, "error": "nope"}));
    }
}
