//! Translation proxy server entry point, with HTTP/2 support.

use std::time::Duration;

use hyper::server::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tower::Service;
use tracing::info;
use translation_proxy::{create_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    let state = AppState::new(config.clone()).await;
    spawn_cleanup_task(state.clone());

    let app = create_router(state);

    let addr = std::net::SocketAddr::from((
        config.host.parse::<std::net::IpAddr>().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED.into()),
        config.port,
    ));
    info!("translation proxy starting on http://{}", addr);
    info!("instance id: {}", config.instance_id);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let app = app.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = hyper::service::service_fn(move |req| {
                let mut app = app.clone();
                async move {
                    app.call(req).await.map_err(|e| {
                        tracing::error!("service error: {:?}", e);
                        std::io::Error::other(format!("{:?}", e))
                    })
                }
            });

            if let Err(err) = http2::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::error!("HTTP/2 connection error: {:?}", err);
            }
        });
    }
}

/// Periodically sweep expired cache entries and stale rate-limiter buckets
/// on `CLEANUP_INTERVAL`, independent of the eager per-request expiry each
/// component performs on its own.
fn spawn_cleanup_task(state: AppState) {
    let interval_seconds = state.config().cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            interval.tick().await;
            state.pipeline().cache.sweep_expired().await;
            state.pipeline().rate_limiter.cleanup_stale();
        }
    });
}
