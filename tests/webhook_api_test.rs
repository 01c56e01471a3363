//! HTTP surface integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use autodialer::application::{DialerEngine, DialerSettings, Dispatcher, Repositories};
use autodialer::config::ProviderConfig;
use autodialer::domain::agent::{Agent, AgentStatus};
use autodialer::domain::call::{CallStatus, Disposition};
use autodialer::domain::campaign::Campaign;
use autodialer::domain::lead::Lead;
use autodialer::domain::telephony::TelephonyProvider;
use autodialer::infrastructure::persistence::MemoryStore;
use autodialer::infrastructure::telephony::twilio::{compute_signature, SIGNATURE_HEADER};
use autodialer::infrastructure::telephony::{webhook_paths, SimulatedProvider, TwilioProvider};
use autodialer::interface::api::{build_router, AppState};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`

const BASE_URL: &str = "https://dialer.example.com";
const AUTH_TOKEN: &str = "test-auth-token";

struct TestApp {
    store: Arc<MemoryStore>,
    engine: Arc<DialerEngine>,
    campaign: Campaign,
    router: Router,
}

async fn setup(provider: Arc<dyn TelephonyProvider>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let campaign = Campaign::new("Webhook test", "+15550000000");
    store.insert_campaign(campaign.clone()).await;

    let engine = Arc::new(DialerEngine::new(
        Repositories::from_store(store.clone()),
        provider,
        DialerSettings::default(),
    ));
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
    let router = build_router(AppState::new(engine.clone(), BASE_URL), prometheus_handle);

    TestApp {
        store,
        engine,
        campaign,
        router,
    }
}

fn twilio() -> Arc<dyn TelephonyProvider> {
    let config = ProviderConfig {
        account_sid: "AC00000000000000000000000000000000".to_string(),
        auth_token: AUTH_TOKEN.to_string(),
        webhook_base_url: BASE_URL.to_string(),
        validate_signatures: true,
        ..ProviderConfig::default()
    };
    Arc::new(TwilioProvider::from_config(&config).unwrap())
}

fn simulated() -> Arc<dyn TelephonyProvider> {
    Arc::new(SimulatedProvider::new(BASE_URL))
}

/// Queue and launch every pending lead
async fn launch(app: &TestApp) {
    app.engine.start_campaign(app.campaign.id).await.unwrap();
    let dispatcher = Dispatcher::new(app.engine.clone(), std::time::Duration::from_secs(1), 10);
    dispatcher.tick(Utc::now()).await.unwrap();
}

fn form_request(path_and_query: &str, params: &[(&str, &str)], signature: Option<&str>) -> Request<Body> {
    let body = serde_urlencoded::to_string(params).unwrap();
    let mut builder = Request::builder()
        .method("POST")
        .uri(path_and_query)
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn sign(path_and_query: &str, params: &[(&str, &str)]) -> String {
    let owned: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    compute_signature(AUTH_TOKEN, &format!("{}{}", BASE_URL, path_and_query), &owned)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup(simulated()).await;

    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_unsigned_webhook_is_rejected() {
    let app = setup(twilio()).await;
    let lead = Lead::new(app.campaign.id, "+15551112222");
    app.store.insert_lead(lead).await;

    let path = webhook_paths::STATUS;
    let params = [("CallSid", "CA123"), ("CallStatus", "completed")];

    let missing = app
        .router
        .clone()
        .oneshot(form_request(path, &params, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let forged = app
        .router
        .clone()
        .oneshot(form_request(path, &params, Some("bm90IGEgc2lnbmF0dXJl")))
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
    let json: Value = serde_json::from_str(&body_string(forged).await).unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_signed_webhook_for_unknown_call_is_acknowledged() {
    let app = setup(twilio()).await;

    let path = webhook_paths::STATUS;
    let params = [("CallSid", "CA_UNKNOWN"), ("CallStatus", "completed")];
    let signature = sign(path, &params);

    let response = app
        .router
        .oneshot(form_request(path, &params, Some(&signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("<Response>"));
}

#[tokio::test]
async fn test_signed_status_webhook_updates_call() {
    let app = setup(simulated()).await;
    app.store
        .insert_lead(Lead::new(app.campaign.id, "+15551113333"))
        .await;
    launch(&app).await;
    let call = app.store.calls().await.remove(0);
    let sid = call.provider_call_id.clone().unwrap().to_string();

    let path = format!("{}?callId={}", webhook_paths::STATUS, call.id);
    let params = [
        ("CallSid", sid.as_str()),
        ("CallStatus", "busy"),
        ("CallDuration", "0"),
    ];
    let response = app
        .router
        .clone()
        .oneshot(form_request(&path, &params, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let updated = app.store.calls().await.remove(0);
    assert_eq!(updated.status, CallStatus::Busy);
    assert_eq!(updated.disposition, Some(Disposition::Busy));

    // Readable through the API afterwards
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!("/api/calls/{}", call.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["data"]["status"], "busy");
    assert_eq!(json["data"]["disposition"], "busy");
}

#[tokio::test]
async fn test_agent_answer_webhook_returns_whisper() {
    let app = setup(simulated()).await;
    app.store
        .insert_lead(Lead::new(app.campaign.id, "+15551114444").with_name("Sam", "Lee"))
        .await;
    let mut agent = Agent::new("Alice", "+15557770000");
    agent.status = AgentStatus::Available;
    app.store.insert_agent(agent.clone()).await;
    launch(&app).await;
    let call = app.store.calls().await.remove(0);
    let sid = call.provider_call_id.clone().unwrap().to_string();

    let amd_path = format!("{}?callId={}", webhook_paths::AMD, call.id);
    let response = app
        .router
        .clone()
        .oneshot(form_request(
            &amd_path,
            &[("CallSid", sid.as_str()), ("AnsweredBy", "human")],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let answer_path = format!(
        "{}?callId={}&agentId={}",
        webhook_paths::AGENT_ANSWER,
        call.id,
        agent.id
    );
    let response = app
        .router
        .clone()
        .oneshot(form_request(&answer_path, &[("CallSid", "SIM_AGENT")], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/xml"
    );
    let twiml = body_string(response).await;
    assert!(twiml.contains("Connecting you with Sam Lee"));
    assert!(twiml.contains("<Gather"));

    let accept_path = format!(
        "{}?callId={}&agentId={}",
        webhook_paths::AGENT_ACCEPT,
        call.id,
        agent.id
    );
    let response = app
        .router
        .oneshot(form_request(&accept_path, &[("Digits", "1")], None))
        .await
        .unwrap();
    let twiml = body_string(response).await;
    assert!(twiml.contains("<Conference"));
    assert!(twiml.contains(&format!("call_{}", call.id)));
}

#[tokio::test]
async fn test_unknown_call_is_not_found() {
    let app = setup(simulated()).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!("/api/calls/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_campaign_start_and_stats() {
    let app = setup(simulated()).await;
    for phone in ["+15551115555", "+15551116666"] {
        app.store.insert_lead(Lead::new(app.campaign.id, phone)).await;
    }

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/campaigns/{}/start", app.campaign.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["data"]["leads_queued"], 2);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!("/api/calls/stats?campaign_id={}", app.campaign.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["data"]["queue_depth"], 2);
    assert_eq!(json["data"]["total_calls"], 0);
}

#[tokio::test]
async fn test_agent_status_update() {
    let app = setup(simulated()).await;
    let agent = Agent::new("Bob", "+15557771111");
    app.store.insert_agent(agent.clone()).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/agents/{}/status", agent.id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"status":"available"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.store.agent(agent.id).await.unwrap().status,
        AgentStatus::Available
    );

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/agents/{}/status", uuid::Uuid::new_v4()))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"status":"available"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
