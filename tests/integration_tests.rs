//! End-to-end HTTP surface tests, mirroring the scenarios in the design
//! notes: cache hit on a repeated batch request, per-client rate limiting,
//! and the auxiliary health/stats endpoints.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use translation_proxy::{create_router, AppState, Config};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_state() -> AppState {
    AppState::new(Config::for_test()).await
}

fn translate_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/proxy/translate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check_reports_ok_and_instance_id() {
    let state = test_state().await;
    let instance_id = state.config().instance_id.clone();
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["instance_id"], instance_id);
}

#[tokio::test]
async fn stats_endpoint_reports_zeroed_counters_on_a_fresh_instance() {
    let app = create_router(test_state().await);

    let response = app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_requests"], 0);
    assert_eq!(json["cache_size"], 0);
}

#[tokio::test]
async fn head_probe_on_translate_returns_ok_without_a_body() {
    let app = create_router(test_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/proxy/translate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn batch_translate_round_trips_through_a_mocked_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "[\"Bonjour\"]"
        })))
        .mount(&mock_server)
        .await;

    let app = create_router(test_state().await);
    let body = serde_json::json!({
        "target_endpoint": format!("{}/translate", mock_server.uri()),
        "username": "user",
        "password": "pass",
        "model": "translator-1",
        "user_input": "[\"Hello\"]",
        "system_prompt": "Translate into French",
    });

    let response = app.oneshot(translate_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["choices"][0]["message"]["content"], "[\"Bonjour\"]");
    assert_eq!(json["cached"], false);
}

#[tokio::test]
async fn repeated_identical_request_is_served_from_cache() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "[\"Bonjour\"]"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_router(test_state().await);
    let body = serde_json::json!({
        "target_endpoint": format!("{}/translate", mock_server.uri()),
        "username": "user",
        "password": "pass",
        "model": "translator-1",
        "user_input": "[\"Hello\"]",
        "system_prompt": "Translate into French",
    });

    let first = app.clone().oneshot(translate_request(body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(translate_request(body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["cached"], true);
    assert_eq!(json["choices"][0]["message"]["content"], "[\"Bonjour\"]");

    // wiremock's `.expect(1)` is verified on drop; reaching here with only
    // one upstream call made confirms the second request never left the cache.
}

#[tokio::test]
async fn exceeding_the_rate_limit_burst_returns_429() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "Bonjour"
        })))
        .mount(&mock_server)
        .await;

    let mut config = Config::for_test();
    config.rate_limit_burst = 1;
    config.rate_limit_rpm = 1;
    let app = create_router(AppState::new(config).await);

    let body = serde_json::json!({
        "target_endpoint": format!("{}/translate", mock_server.uri()),
        "username": "same-user",
        "password": "pass",
        "model": "translator-1",
        "user_input": "Hello",
    });

    let first = app.clone().oneshot(translate_request(body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(translate_request(body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

/// Builds an OpenAI-style SSE body: one `data: ` line per delta frame,
/// terminated by `data: [DONE]`, matching what a real upstream sends.
fn sse_body(deltas: &[&str]) -> String {
    let mut out = String::new();
    for delta in deltas {
        out.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": delta}}]})
        ));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

#[tokio::test]
async fn streaming_translate_emits_one_frame_per_item_then_a_done_frame() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&[r#"["Bonjour", "Monde"]"#]), "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let app = create_router(test_state().await);
    let body = serde_json::json!({
        "target_endpoint": format!("{}/translate", mock_server.uri()),
        "username": "user",
        "password": "pass",
        "model": "translator-1",
        "user_input": "[\"Hello\", \"World\"]",
        "system_prompt": "Translate into French",
        "stream": true,
    });

    let response = app.oneshot(translate_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-cache"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let frames: Vec<serde_json::Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(frames[0]["index"], 0);
    assert_eq!(frames[0]["translation"], "Bonjour");
    assert_eq!(frames[1]["index"], 1);
    assert_eq!(frames[1]["translation"], "Monde");
    assert_eq!(frames[2]["done"], true);
    assert_eq!(frames[2]["total"], 2);
}

#[tokio::test]
async fn concurrent_streaming_requests_with_the_same_fingerprint_open_one_upstream_stream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&[r#"["Bonjour"]"#]), "text/event-stream"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_router(test_state().await);
    let body = serde_json::json!({
        "target_endpoint": format!("{}/translate", mock_server.uri()),
        "username": "user",
        "password": "pass",
        "model": "translator-1",
        "user_input": "[\"Hello\"]",
        "system_prompt": "Translate into French",
        "stream": true,
    });

    let requests = (0..5).map(|_| app.clone().oneshot(translate_request(body.clone())));
    let responses = futures_util::future::join_all(requests).await;

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(frames[0]["translation"], "Bonjour");
        assert_eq!(frames[1]["done"], true);
    }

    // wiremock's `.expect(1)` is verified on drop; reaching here with five
    // identical-fingerprint streaming requests made confirms they coalesced
    // onto a single upstream stream.
}
