//! Gateway servers: the HTTP front door (web commands, Twilio webhook, health) and the RPC
//! listener skill packages call back into. Both share one `GatewayState`.

use crate::channels::{ChannelRegistry, SmsChannel, TwilioGateway, WebChannel};
use crate::classifier::Classifier;
use crate::config::{self, Config};
use crate::context::ContextStore;
use crate::dispatch::{DispatchError, DispatchServices, Dispatcher, InboundRequest};
use crate::gateway::protocol::{CommandForm, RpcRequest, RpcResponse, TwilioForm};
use crate::gateway::rpc;
use crate::init;
use crate::packages::{self, load_packages, HttpSkillTransport, PackageRegistry};
use crate::routing::ResponseRouter;
use crate::transcript::JsonlTranscript;
use crate::types::{FlexIdType, FlexIdentity};
use crate::users::UserStore;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Shared by every handler on both listeners.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    /// Required bearer token for RPC calls, when set.
    pub rpc_token: Option<String>,
}

impl GatewayState {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        let rpc_token = config::resolve_rpc_token(&config);
        Self {
            config: Arc::new(config),
            dispatcher,
            rpc_token,
        }
    }

    pub(crate) async fn health(&self) -> serde_json::Value {
        let packages = self.dispatcher.services().registry.list().await.len();
        json!({
            "runtime": "running",
            "port": self.config.gateway.port,
            "rpcPort": self.config.gateway.rpc_port(),
            "packages": packages,
        })
    }
}

/// Build every service from config: classifier (with its training file), stores, the
/// package registry filled from manifests, channels, transcript, and the dispatcher.
pub async fn build_state(config: &Config, config_path: &Path) -> Result<GatewayState> {
    let training_file = config::resolve_training_file(config, config_path);
    let classifier = Classifier::open(&training_file, config.classifier.min_confidence)
        .await
        .with_context(|| format!("opening training file {}", training_file.display()))?;

    let registry = Arc::new(PackageRegistry::new());
    let packages_dir = config::resolve_packages_dir(config, config_path);
    let extra_dirs = config::resolve_extra_package_dirs(config, config_path);
    let descriptors = match load_packages(
        Some(packages_dir.as_path()),
        &extra_dirs,
        &config.packages.disabled,
    ) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("loading packages failed: {}", e);
            Vec::new()
        }
    };
    for descriptor in descriptors {
        let name = descriptor.name.clone();
        if let Err(e) = registry.register(descriptor).await {
            log::warn!("skipping package {}: {}", name, e);
        }
    }
    log::info!("registered {} package(s)", registry.list().await.len());

    let channels = Arc::new(ChannelRegistry::new());
    channels.register(Arc::new(WebChannel)).await;
    match config::resolve_sms_credentials(config) {
        Some(creds) => {
            let twilio = TwilioGateway::new(
                creds.api_base,
                creds.account_sid,
                creds.auth_token,
                creds.from_number,
            );
            channels.register(Arc::new(SmsChannel::new(Arc::new(twilio)))).await;
            log::info!("sms channel registered (twilio)");
        }
        None => log::debug!("sms channel not configured; phone replies go back in the webhook answer"),
    }

    let transcript_path = config::resolve_transcript_path(config, config_path);
    log::info!("transcript at {}", transcript_path.display());
    let services = DispatchServices {
        classifier: Arc::new(classifier),
        users: Arc::new(UserStore::new()),
        contexts: Arc::new(ContextStore::new(Duration::from_secs(config.context.ttl_secs))),
        registry,
        transport: Arc::new(HttpSkillTransport::new()),
        transcript: Arc::new(JsonlTranscript::new(transcript_path)),
        router: Arc::new(ResponseRouter::new(channels)),
    };
    let dispatcher = Arc::new(Dispatcher::new(services, config.dispatch.settings()));
    Ok(GatewayState::new(config.clone(), dispatcher))
}

/// HTTP front door: `GET /` health, `POST /` web command, `POST /twilio` inbound SMS.
pub fn http_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http).post(command_http))
        .route("/twilio", post(twilio_http))
        .with_state(state)
}

/// RPC listener: `POST /rpc` plus the same health route.
pub fn rpc_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/rpc", post(rpc_http))
        .with_state(state)
}

/// Run the gateway until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config, config_path: std::path::PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config::resolve_rpc_token(&config).is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without an RPC token (set gateway.rpcToken or SWITCHBOARD_RPC_TOKEN)",
            bind
        );
    }
    let port = config.gateway.port;
    let Some(rpc_port) = config.gateway.rpc_port() else {
        anyhow::bail!("gateway.port is {}; set gateway.rpcPort explicitly", port);
    };
    if port == rpc_port {
        anyhow::bail!("gateway.port and gateway.rpcPort must differ (both {})", port);
    }

    let state = build_state(&config, &config_path).await?;
    let services = state.dispatcher.services();
    packages::spawn_health_probes(services.registry.clone(), services.transport.clone());

    let http_addr = format!("{}:{}", bind, port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding to {}", http_addr))?;
    let rpc_addr = format!("{}:{}", bind, rpc_port);
    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr)
        .await
        .with_context(|| format!("binding to {}", rpc_addr))?;
    log::info!("gateway listening on {} (rpc on {})", http_addr, rpc_addr);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let http_shutdown = wait_for_shutdown(shutdown_tx.subscribe());
    let rpc_shutdown = wait_for_shutdown(shutdown_tx.subscribe());
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let http = axum::serve(http_listener, http_router(state.clone()))
        .with_graceful_shutdown(http_shutdown);
    let rpc = axum::serve(rpc_listener, rpc_router(state)).with_graceful_shutdown(rpc_shutdown);
    tokio::try_join!(
        async { http.await.context("gateway server exited") },
        async { rpc.await.context("rpc listener exited") },
    )?;
    log::info!("gateway stopped");
    Ok(())
}

async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(state.health().await)
}

fn dispatch_error_response(e: DispatchError) -> Response {
    let status = match &e {
        DispatchError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        DispatchError::ClassifierUntrained => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Training(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// Parse the web form into a request; `Err` carries the 400 body.
fn command_request(form: CommandForm) -> Result<InboundRequest, String> {
    let flex_id_type = match form.flexidtype.as_deref().map(str::trim) {
        None | Some("") => FlexIdType::Web,
        Some(t) => t.parse::<FlexIdType>()?,
    };
    let identity = FlexIdentity::new(form.flexid.trim(), flex_id_type);
    let mut req = InboundRequest::new(form.cmd, identity);
    if let Some(uid) = form.uid.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let id = uid
            .parse::<u64>()
            .map_err(|_| format!("invalid uid: {}", uid))?;
        req = req.with_user_id(id);
    }
    if let Some(route) = form.route.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        req = req.with_route(route);
    }
    Ok(req)
}

/// POST / runs one turn and answers with the reply text.
async fn command_http(State(state): State<GatewayState>, Form(form): Form<CommandForm>) -> Response {
    let req = match command_request(form) {
        Ok(r) => r,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    match state.dispatcher.respond(&req).await {
        Ok(turn) => Html(turn.reply).into_response(),
        Err(e) => dispatch_error_response(e),
    }
}

/// POST /twilio runs one turn for the sender. The reply normally leaves by SMS; the TwiML
/// answer carries it only when that delivery failed.
async fn twilio_http(State(state): State<GatewayState>, Form(form): Form<TwilioForm>) -> Response {
    let req = InboundRequest::new(form.body, FlexIdentity::phone(form.from.trim()));
    let message = match state.dispatcher.respond(&req).await {
        Ok(turn) if turn.delivered => None,
        Ok(turn) => Some(turn.reply),
        Err(e) => {
            log::info!("twilio: {} from {}", e, req.identity);
            Some(e.to_string())
        }
    };
    (
        [(header::CONTENT_TYPE, "application/xml")],
        twiml(message.as_deref()),
    )
        .into_response()
}

fn twiml(message: Option<&str>) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    if let Some(m) = message.filter(|m| !m.is_empty()) {
        out.push_str("<Message>");
        out.push_str(&xml_escape(m));
        out.push_str("</Message>");
    }
    out.push_str("</Response>");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// POST /rpc: one request, one response.
async fn rpc_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<RpcRequest>,
) -> Response {
    if let Some(ref expected) = state.rpc_token {
        if bearer_token(&headers) != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(RpcResponse::err(&req.id, "unauthorized")),
            )
                .into_response();
        }
    }
    Json(rpc::handle_rpc(&state, req).await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twiml_is_empty_or_escaped() {
        assert_eq!(
            twiml(None),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
        assert_eq!(
            twiml(Some("a < b & \"c\"")),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>a &lt; b &amp; &quot;c&quot;</Message></Response>"#
        );
    }

    #[test]
    fn command_form_parsing() {
        let form = CommandForm {
            cmd: "hi".into(),
            flexid: " +15550001111 ".into(),
            flexidtype: Some("2".into()),
            uid: Some("7".into()),
            route: Some(" weather ".into()),
        };
        let req = command_request(form).unwrap();
        assert_eq!(req.identity, FlexIdentity::phone("+15550001111"));
        assert_eq!(req.user_id, Some(7));
        assert_eq!(req.route.as_deref(), Some("weather"));

        let req = command_request(CommandForm {
            cmd: "hi".into(),
            flexid: "s".into(),
            uid: Some("".into()),
            ..CommandForm::default()
        })
        .unwrap();
        assert_eq!(req.identity.flex_id_type, FlexIdType::Web);
        assert_eq!(req.user_id, None);

        assert!(command_request(CommandForm {
            flexidtype: Some("fax".into()),
            ..CommandForm::default()
        })
        .is_err());
        assert!(command_request(CommandForm {
            uid: Some("abc".into()),
            ..CommandForm::default()
        })
        .is_err());
    }

    #[test]
    fn bearer_token_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("secret"));
    }
}
