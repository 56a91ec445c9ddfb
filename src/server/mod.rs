//! Router assembly and middleware stack.

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::{self, TraceLayer},
};
use tracing::Level;

/// Build the router with all routes and the ambient middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    Router::new()
        .route("/proxy/translate", post(handlers::translate).head(handlers::translate_head))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .layer(
            ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(cors)
                .layer(middleware::from_fn_with_state(state.clone(), inject_instance_id)),
        )
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.config().allowed_origins_list();
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
    }
}

/// Stamps every response with `X-Instance-ID` so clients can tell which
/// process instance served a request behind a load balancer.
async fn inject_instance_id(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&state.config().instance_id) {
        response.headers_mut().insert("X-Instance-ID", value);
    }
    response
}
