//! Shared application state passed to every HTTP handler.

use std::sync::Arc;

use crate::config::Config;
use crate::core::http_client::HttpClientBuilder;
use crate::pipeline::RequestPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<RequestPipeline>,
}

impl AppState {
    pub async fn new(config: Config) -> Self {
        let http_client = HttpClientBuilder::from_config(&config)
            .build()
            .unwrap_or_else(|_| HttpClientBuilder::new().build().unwrap());

        let pipeline = Arc::new(RequestPipeline::new(config.clone(), http_client));

        Self { config, pipeline }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_from_config() {
        let config = Config::for_test();
        let state = AppState::new(config).await;
        assert_eq!(state.config().port, 8080);
    }
}
