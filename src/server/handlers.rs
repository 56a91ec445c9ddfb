//! HTTP route handlers.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json as JsonResponse, Response},
    Json,
};
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ProxyError;
use crate::schemas::{HealthResponse, StatsResponse, TranslateRequest, TranslateResponse};

use super::AppState;

/// `POST /proxy/translate` — batch or streaming, depending on `stream`.
///
/// Each streamed item is emitted as `{"index", "translation"}` (with
/// `"cached": true` appended for entries replayed from cache), followed by a
/// terminal `{"done": true, "total"}` frame once the upstream stream
/// completes. Errors are emitted inline as `{"error": {"type", "message"}}`
/// rather than terminating the connection.
pub async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Response, ProxyError> {
    if req.stream {
        let stream = state.pipeline.handle_streaming(req).await?;
        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_for_done = emitted.clone();

        let events = stream
            .map(move |item| -> Result<Event, Infallible> {
                match item {
                    Ok(stream_item) => {
                        emitted.fetch_add(1, Ordering::Relaxed);
                        let payload = if stream_item.cached {
                            serde_json::json!({
                                "index": stream_item.index,
                                "translation": stream_item.translation,
                                "cached": true,
                            })
                        } else {
                            serde_json::json!({
                                "index": stream_item.index,
                                "translation": stream_item.translation,
                            })
                        };
                        Ok(Event::default().data(payload.to_string()))
                    }
                    Err(err) => Ok(Event::default().data(err.to_json().to_string())),
                }
            })
            .chain(futures_util::stream::once(async move {
                let total = emitted_for_done.load(Ordering::Relaxed);
                Ok(Event::default().data(serde_json::json!({ "done": true, "total": total }).to_string()))
            }));
        let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        // disables response buffering on nginx-style intermediaries so
        // frames reach the client as they're emitted instead of batched.
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        Ok(response)
    } else {
        let response: TranslateResponse = state.pipeline().handle_batch(req).await?;
        Ok(Json(response).into_response())
    }
}

/// `HEAD /proxy/translate` — a lightweight reachability probe.
pub async fn translate_head(State(_state): State<AppState>) -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    JsonResponse(HealthResponse {
        status: "ok",
        instance_id: state.config().instance_id.clone(),
    })
}

/// `GET /stats` — aggregates every component's own counters.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    let cache_stats = pipeline.cache.stats().await;
    let metrics = pipeline.metrics.snapshot();

    JsonResponse(StatsResponse {
        instance_id: state.config().instance_id.clone(),
        uptime_seconds: pipeline.metrics.uptime_seconds(),
        cache_hit_rate: cache_stats.hit_rate(),
        cache_size: pipeline.cache.len().await,
        dedup_in_flight: pipeline.dedup.in_flight_count(),
        rate_limiter_rejections: pipeline.rate_limiter.rejection_count(),
        rate_limiter_tracked_clients: pipeline.rate_limiter.tracked_clients(),
        concurrency_available_permits: pipeline.concurrency_gate.available_permits(),
        total_requests: metrics.total_requests,
        successful_requests: metrics.successful_requests,
        failed_requests: metrics.failed_requests,
        avg_response_time_ms: metrics.avg_response_time_ms,
    })
}
