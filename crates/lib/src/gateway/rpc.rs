//! RPC methods skill packages call back into: identity, context and classifier queries, and
//! package (de)registration.

use serde::de::DeserializeOwned;
use serde_json::json;

use super::protocol::{
    ClassifyParams, DeregisterParams, LinkIdentityParams, RegisterParams, ResolveUserParams,
    RpcRequest, RpcResponse, UserIdParams,
};
use super::server::GatewayState;
use crate::types::FlexIdentity;

fn params<T: DeserializeOwned>(req: &RpcRequest) -> Result<T, String> {
    serde_json::from_value(req.params.clone())
        .map_err(|e| format!("invalid {} params: {}", req.method, e))
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(v).map_err(|e| e.to_string())
}

/// Run one RPC method. Errors become `ok: false` responses; nothing here fails the transport.
pub async fn handle_rpc(state: &GatewayState, req: RpcRequest) -> RpcResponse {
    match call(state, &req).await {
        Ok(payload) => RpcResponse::ok(&req.id, payload),
        Err(e) => {
            log::debug!("rpc: {} failed: {}", req.method, e);
            RpcResponse::err(&req.id, e)
        }
    }
}

async fn call(state: &GatewayState, req: &RpcRequest) -> Result<serde_json::Value, String> {
    let services = state.dispatcher.services();
    match req.method.as_str() {
        "health" => Ok(state.health().await),
        "resolveUser" => {
            let p: ResolveUserParams = params(req)?;
            let identity = FlexIdentity::new(p.flex_id.trim(), p.flex_id_type.resolve()?);
            let user = services
                .users
                .resolve_user(&identity)
                .await
                .map_err(|e| e.to_string())?;
            to_value(&user)
        }
        "getUser" => {
            let p: UserIdParams = params(req)?;
            match services.users.get_user(p.user_id).await {
                Some(user) => to_value(&user),
                None => Err(format!("unknown user: {}", p.user_id)),
            }
        }
        "linkIdentity" => {
            let p: LinkIdentityParams = params(req)?;
            let flex_id = p.flex_id.trim();
            if flex_id.is_empty() {
                return Err("flexId must not be empty".to_string());
            }
            let identity = FlexIdentity::new(flex_id, p.flex_id_type.resolve()?);
            services
                .users
                .link_identity(p.user_id, identity.clone())
                .await
                .map_err(|e| e.to_string())?;
            log::info!("rpc: linked {} to user {}", identity, p.user_id);
            Ok(json!({ "linked": p.user_id }))
        }
        "getContext" => {
            let p: UserIdParams = params(req)?;
            to_value(&services.contexts.get_context(p.user_id).await)
        }
        "clearContext" => {
            let p: UserIdParams = params(req)?;
            services.contexts.clear(p.user_id).await;
            Ok(json!({ "cleared": p.user_id }))
        }
        "classify" => {
            let p: ClassifyParams = params(req)?;
            let input = services
                .classifier
                .classify(&p.text)
                .await
                .map_err(|e| e.to_string())?;
            to_value(&input)
        }
        "register" => {
            let p: RegisterParams = params(req)?;
            let name = p.descriptor.name.clone();
            services
                .registry
                .register(p.descriptor)
                .await
                .map_err(|e| e.to_string())?;
            log::info!("rpc: package {} registered", name);
            Ok(json!({ "registered": name }))
        }
        "deregister" => {
            let p: DeregisterParams = params(req)?;
            let removed = services.registry.deregister(&p.name).await.is_some();
            if removed {
                log::info!("rpc: package {} deregistered", p.name);
            }
            Ok(json!({ "removed": removed }))
        }
        "listPackages" => to_value(&services.registry.list().await),
        other => Err(format!("unknown method: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{DispatchServices, DispatchSettings, Dispatcher};
    use crate::packages::{LocalTransport, PackageDescriptor};
    use crate::routing::ResponseRouter;
    use crate::transcript::MemoryTranscript;
    use std::sync::Arc;

    async fn state() -> GatewayState {
        let services = DispatchServices {
            classifier: Arc::new(Default::default()),
            users: Arc::new(Default::default()),
            contexts: Arc::new(Default::default()),
            registry: Arc::new(Default::default()),
            transport: Arc::new(LocalTransport::new()),
            transcript: Arc::new(MemoryTranscript::new()),
            router: Arc::new(ResponseRouter::web_only().await),
        };
        let dispatcher = Arc::new(Dispatcher::new(services, DispatchSettings::default()));
        GatewayState::new(Config::default(), dispatcher)
    }

    fn req(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            id: "1".to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn resolve_then_get_user_and_context() {
        let s = state().await;
        let res = handle_rpc(&s, req("resolveUser", json!({"flexId": "+1555", "flexIdType": 2}))).await;
        assert!(res.ok, "{:?}", res.error);
        let id = res.payload.unwrap()["id"].as_u64().unwrap();
        assert_ne!(id, 0);

        let res = handle_rpc(&s, req("getUser", json!({"userId": id}))).await;
        assert!(res.ok);
        let res = handle_rpc(&s, req("getUser", json!({"userId": 999}))).await;
        assert!(!res.ok);

        let res = handle_rpc(&s, req("getContext", json!({"userId": id}))).await;
        assert_eq!(res.payload.unwrap()["userId"].as_u64(), Some(id));
    }

    #[tokio::test]
    async fn register_list_deregister() {
        let s = state().await;
        let desc = PackageDescriptor::new("weather", &["weather"], "http://127.0.0.1:1");
        let res = handle_rpc(&s, req("register", json!({ "descriptor": desc }))).await;
        assert!(res.ok, "{:?}", res.error);
        let res = handle_rpc(&s, req("listPackages", serde_json::Value::Null)).await;
        assert_eq!(res.payload.unwrap().as_array().map(|a| a.len()), Some(1));

        let clash = PackageDescriptor::new("weather2", &["weather"], "http://127.0.0.1:2");
        let res = handle_rpc(&s, req("register", json!({ "descriptor": clash }))).await;
        assert!(!res.ok);

        let res = handle_rpc(&s, req("deregister", json!({"name": "weather"}))).await;
        assert_eq!(res.payload.unwrap()["removed"], json!(true));
    }

    #[tokio::test]
    async fn linked_identity_resolves_to_the_same_user() {
        let s = state().await;
        let res = handle_rpc(&s, req("resolveUser", json!({"flexId": "+1555", "flexIdType": "phone"}))).await;
        let id = res.payload.unwrap()["id"].as_u64().unwrap();

        let link = json!({"userId": id, "flexId": "browser-1", "flexIdType": 1});
        let res = handle_rpc(&s, req("linkIdentity", link)).await;
        assert!(res.ok, "{:?}", res.error);
        let res = handle_rpc(&s, req("resolveUser", json!({"flexId": "browser-1", "flexIdType": 1}))).await;
        assert_eq!(res.payload.unwrap()["id"].as_u64(), Some(id));
        assert_eq!(s.dispatcher.services().users.len().await, 1);

        let res = handle_rpc(
            &s,
            req("linkIdentity", json!({"userId": 999, "flexId": "x", "flexIdType": 1})),
        )
        .await;
        assert!(!res.ok);
        let res = handle_rpc(
            &s,
            req("linkIdentity", json!({"userId": id, "flexId": " ", "flexIdType": 1})),
        )
        .await;
        assert_eq!(res.error.as_deref(), Some("flexId must not be empty"));
    }

    #[tokio::test]
    async fn clear_context_starts_the_user_over() {
        let s = state().await;
        let contexts = &s.dispatcher.services().contexts;
        let turn = contexts.begin_turn(42).await;
        let input = crate::types::StructuredInput::classified("weather", 0.9, "rain?");
        let outcome = crate::types::DispatchOutcome::reply("which city?").with_pending_slot("city", "?");
        contexts.commit_context(42, turn, &input, &outcome).await;
        assert_eq!(contexts.get_context(42).await.pending_slots.len(), 1);

        let res = handle_rpc(&s, req("clearContext", json!({"userId": 42}))).await;
        assert!(res.ok, "{:?}", res.error);
        let res = handle_rpc(&s, req("getContext", json!({"userId": 42}))).await;
        let ctx = res.payload.unwrap();
        assert_eq!(ctx["turn"], json!(0));
        assert_eq!(ctx["lastIntent"], json!(null));
    }

    #[tokio::test]
    async fn classify_untrained_and_unknown_method() {
        let s = state().await;
        let res = handle_rpc(&s, req("classify", json!({"text": "hello"}))).await;
        assert!(!res.ok);
        let res = handle_rpc(&s, req("nope", serde_json::Value::Null)).await;
        assert_eq!(res.error.as_deref(), Some("unknown method: nope"));
        let res = handle_rpc(&s, req("getUser", json!({}))).await;
        assert!(res.error.unwrap().starts_with("invalid getUser params"));
    }
}
