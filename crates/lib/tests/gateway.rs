//! Integration tests: start the gateway on free ports and drive it over HTTP the way the web
//! front end, Twilio and skill packages do. Server tasks are left running when a test ends.

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use switchboard::config::Config;
use switchboard::gateway;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("switchboard-gateway-test-{}", uuid::Uuid::new_v4()));
    let config_path = dir.join("config.json");
    switchboard::init::init_config_dir(&config_path).expect("init config dir");
    (dir, config_path)
}

/// Start the gateway and wait for its health route. Returns (http base, rpc base, config dir).
async fn start_gateway() -> (String, String, PathBuf) {
    let (dir, config_path) = temp_config_dir();
    let port = free_port();
    let rpc_port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.rpc_port = Some(rpc_port);
    config.gateway.bind = "127.0.0.1".to_string();

    tokio::spawn(async move {
        if let Err(e) = gateway::run_gateway(config, config_path).await {
            eprintln!("gateway exited: {:#}", e);
        }
    });

    let http = format!("http://127.0.0.1:{}", port);
    let rpc = format!("http://127.0.0.1:{}", rpc_port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        let up = client.get(format!("{}/", http)).send().await;
        let rpc_up = client.get(format!("{}/", rpc)).send().await;
        if matches!((up, rpc_up), (Ok(a), Ok(b)) if a.status().is_success() && b.status().is_success())
        {
            return (http, rpc, dir);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway on {} did not come up within 5s", http);
}

/// A skill package answering every invocation with the same reply.
async fn start_fake_skill(reply: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/invoke",
            post(move |Json(message): Json<serde_json::Value>| async move {
                assert!(message.get("input").is_some());
                Json(json!({ "replyText": reply }))
            }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

async fn command(client: &reqwest::Client, http: &str, cmd: &str) -> (u16, String) {
    let res = client
        .post(format!("{}/", http))
        .form(&[("cmd", cmd), ("flexid", "session-1"), ("flexidtype", "1")])
        .send()
        .await
        .expect("POST /");
    let status = res.status().as_u16();
    (status, res.text().await.unwrap_or_default())
}

async fn rpc(client: &reqwest::Client, rpc: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
    client
        .post(format!("{}/rpc", rpc))
        .json(&json!({ "id": "t", "method": method, "params": params }))
        .send()
        .await
        .expect("POST /rpc")
        .json()
        .await
        .expect("rpc JSON")
}

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let (http, rpc_base, _dir) = start_gateway().await;
    let json: serde_json::Value = reqwest::get(format!("{}/", http))
        .await
        .unwrap()
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("packages").and_then(|v| v.as_u64()), Some(0));
    let rpc_port: u16 = rpc_base.rsplit(':').next().unwrap().parse().unwrap();
    assert_eq!(json.get("rpcPort").and_then(|v| v.as_u64()), Some(rpc_port as u64));

    let client = reqwest::Client::new();
    let res = rpc(&client, &rpc_base, "health", json!({})).await;
    assert_eq!(res["ok"], json!(true));
    assert_eq!(res["payload"]["runtime"], json!("running"));
}

#[tokio::test]
async fn commands_train_dispatch_and_persist() {
    let (http, rpc_base, dir) = start_gateway().await;
    let client = reqwest::Client::new();

    let (status, _) = command(&client, &http, "hello").await;
    assert_eq!(status, 503, "untrained classifier");
    let (status, _) = command(&client, &http, "   ").await;
    assert_eq!(status, 400);
    let (status, _) = command(&client, &http, "train greeting").await;
    assert_eq!(status, 400);

    let (status, body) = command(&client, &http, "train greeting: hello there").await;
    assert_eq!(status, 200);
    assert_eq!(body, "");
    assert!(dir.join("data").join("training.json").exists());

    let (status, body) = command(&client, &http, "hello").await;
    assert_eq!(status, 200);
    assert_eq!(body, "Sorry, I didn't understand that.");

    let endpoint = start_fake_skill("hi from skill").await;
    let res = rpc(
        &client,
        &rpc_base,
        "register",
        json!({ "descriptor": { "name": "greeter", "routes": ["greeting"], "endpoint": endpoint } }),
    )
    .await;
    assert_eq!(res["ok"], json!(true), "{}", res);

    let (status, body) = command(&client, &http, "hello").await;
    assert_eq!(status, 200);
    assert_eq!(body, "hi from skill");

    let res = rpc(&client, &rpc_base, "listPackages", json!(null)).await;
    assert_eq!(res["payload"][0]["health"], json!("healthy"));

    let res = rpc(&client, &rpc_base, "resolveUser", json!({ "flexId": "session-1", "flexIdType": 1 })).await;
    let user_id = res["payload"]["id"].as_u64().unwrap();
    let res = rpc(&client, &rpc_base, "getContext", json!({ "userId": user_id })).await;
    assert_eq!(res["payload"]["lastPackage"], json!("greeter"));
    assert_eq!(res["payload"]["turn"], json!(2));

    let transcript = std::fs::read_to_string(dir.join("data").join("turns.jsonl")).unwrap();
    assert_eq!(transcript.lines().count(), 2);
}

#[tokio::test]
async fn twilio_reply_falls_back_to_twiml_without_sms_channel() {
    if std::env::var("TWILIO_ACCOUNT_SID").is_ok() {
        return;
    }
    let (http, _rpc, _dir) = start_gateway().await;
    let client = reqwest::Client::new();
    command(&client, &http, "train greeting: hello there").await;

    let res = client
        .post(format!("{}/twilio", http))
        .form(&[("Body", "hello"), ("From", "+15550001111")])
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body = res.text().await.unwrap();
    assert!(body.contains("<Message>Sorry, I didn&apos;t understand that.</Message>"), "{}", body);
}

#[tokio::test]
async fn last_port_without_rpc_port_is_refused() {
    let (_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.gateway.port = u16::MAX;
    let err = gateway::run_gateway(config, config_path).await.unwrap_err();
    assert!(err.to_string().contains("set gateway.rpcPort explicitly"), "{}", err);
}

#[tokio::test]
async fn non_loopback_bind_without_rpc_token_is_refused() {
    if std::env::var("SWITCHBOARD_RPC_TOKEN").is_ok() {
        return;
    }
    let (_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.gateway.bind = "0.0.0.0".to_string();
    config.gateway.port = free_port();
    let err = gateway::run_gateway(config, config_path).await.unwrap_err();
    assert!(err.to_string().contains("without an RPC token"));
}
