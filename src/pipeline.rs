//! Request orchestration: sequences lockout, rate limiting, fingerprinting,
//! cache lookup, in-flight deduplication, bounded upstream dispatch, and
//! cache/dedup publication.
//!
//! One struct aggregates every component; the sequencing for each request
//! mode (batch vs. streaming) lives in a single async method so the
//! ordering of admission checks is easy to read top to bottom.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::auth_limiter::AuthLimiter;
use crate::cache::TranslationCache;
use crate::concurrency_gate::ConcurrencyGate;
use crate::config::Config;
use crate::dedup::{
    wait_for_outcome_with_deadline, Acquired, Outcome, RequestDeduplicator, StreamAcquired,
    StreamDeduplicator, StreamEvent, StreamOwnerHandle, WaitResult,
};
use crate::error::{ErrorCategory, ProxyError};
use crate::fingerprint::Fingerprint;
use crate::metrics::MetricsCollector;
use crate::rate_limit::RateLimiter;
use crate::schemas::{ResponseMessage, TranslateChoice, TranslateRequest, TranslateResponse};
use crate::upstream::UpstreamClient;

/// Optional hook a downstream crate can install to reject a translated
/// batch (e.g. tag-balance or word-list validation) without the core
/// pipeline depending on that logic.
pub type QualityValidator = dyn Fn(&[String]) -> bool + Send + Sync;

/// A single item of a streamed translation: its position in the batch, the
/// translated text, and whether it was replayed from cache.
#[derive(Debug, Clone)]
pub struct StreamItem {
    pub index: usize,
    pub translation: String,
    pub cached: bool,
}

/// Aggregates every core component and drives one request end to end.
pub struct RequestPipeline {
    pub cache: TranslationCache,
    pub dedup: RequestDeduplicator,
    pub stream_dedup: Arc<StreamDeduplicator>,
    pub rate_limiter: RateLimiter,
    pub auth_limiter: AuthLimiter,
    pub concurrency_gate: ConcurrencyGate,
    pub upstream: UpstreamClient,
    pub metrics: MetricsCollector,
    pub config: Config,
    pub quality_validator: Option<Box<QualityValidator>>,
}

impl RequestPipeline {
    pub fn new(config: Config, http: reqwest::Client) -> Self {
        Self {
            cache: TranslationCache::new(
                config.cache_max_size,
                std::time::Duration::from_secs(config.cache_ttl_seconds),
                std::time::Duration::from_millis(config.lock_timeout_ms),
            ),
            dedup: RequestDeduplicator::new(),
            stream_dedup: StreamDeduplicator::new(),
            rate_limiter: RateLimiter::new(
                config.rate_limit_rpm,
                config.rate_limit_burst,
                std::time::Duration::from_secs(config.client_ttl_seconds),
            ),
            auth_limiter: AuthLimiter::new(
                config.auth_failure_max_attempts,
                config.auth_failure_window_seconds,
                config.auth_failure_lockout_seconds,
            ),
            concurrency_gate: ConcurrencyGate::new(config.max_concurrent_api_calls),
            upstream: UpstreamClient::new(http),
            metrics: MetricsCollector::new(),
            config,
            quality_validator: None,
        }
    }

    fn client_id(&self, req: &TranslateRequest) -> String {
        format!("{}@{}", req.username, req.target_endpoint)
    }

    fn upstream_deadline(&self) -> Duration {
        Duration::from_secs(self.config.http_timeout_seconds)
    }

    /// Lockout and per-client rate limit checks shared by both the batch and
    /// streaming paths. Performed before any fingerprint/cache work so a
    /// locked-out or throttled client never touches the cache or dedup map.
    fn admit(&self, req: &TranslateRequest) -> Result<(), ProxyError> {
        let client_id = self.client_id(req);

        if let Some(remaining) = self.auth_limiter.check(&client_id) {
            warn!(client_id, remaining, "client locked out after repeated auth failures");
            return Err(ProxyError::Locked {
                remaining_seconds: remaining,
            });
        }

        let (allowed, wait_seconds) = self.rate_limiter.acquire(&client_id);
        if !allowed {
            debug!(client_id, wait_seconds, "rate limit exceeded");
            return Err(ProxyError::RateLimited { wait_seconds });
        }

        Ok(())
    }

    /// Resolve the target language and, when the user-text field parses as a
    /// JSON array of strings, the fingerprint over those texts. `None`
    /// signals that cache lookup and deduplication must be skipped for this
    /// request — it goes straight to upstream.
    fn resolve_fingerprint(&self, req: &TranslateRequest) -> (String, Option<Fingerprint>) {
        let language = req.target_language.clone().unwrap_or_else(|| infer_target_language(req));
        let fingerprint = req
            .extract_texts()
            .map(|texts| Fingerprint::compute(&texts, &language, &req.model));
        (language, fingerprint)
    }

    /// Handle a non-streaming translate request.
    pub async fn handle_batch(&self, req: TranslateRequest) -> Result<TranslateResponse, ProxyError> {
        self.metrics.record_request();
        let start = Instant::now();

        let result = self.handle_batch_inner(req).await;

        match &result {
            Ok(_) => self.metrics.record_success(start.elapsed().as_millis() as u64),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn handle_batch_inner(&self, req: TranslateRequest) -> Result<TranslateResponse, ProxyError> {
        self.admit(&req)?;
        let client_id = self.client_id(&req);
        let (_language, fingerprint) = self.resolve_fingerprint(&req);

        let Some(fingerprint) = fingerprint else {
            return self.call_upstream_batch(&req, &client_id, None).await;
        };

        if let Some(cached) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint.short(), "served from cache");
            let content = serde_json::to_string(&cached).unwrap_or_default();
            return Ok(TranslateResponse {
                choices: vec![TranslateChoice {
                    message: ResponseMessage { role: "assistant", content },
                }],
                model: req.model.clone(),
                cached: true,
                usage: None,
            });
        }

        if !self.config.dedup_enabled {
            return self.call_upstream_batch(&req, &client_id, Some(fingerprint)).await;
        }

        match self.dedup.acquire(fingerprint) {
            Acquired::Owner(owner) => {
                let outcome = self.call_upstream_batch(&req, &client_id, Some(fingerprint)).await;
                match &outcome {
                    Ok(response) => {
                        let content = response
                            .choices
                            .first()
                            .map(|c| c.message.content.clone())
                            .unwrap_or_default();
                        owner.publish(Outcome::Success(json!(content)));
                    }
                    Err(err) => owner.publish(Outcome::Failed(err.message())),
                }
                outcome
            }
            Acquired::Waiter(rx) => {
                match wait_for_outcome_with_deadline(rx, self.upstream_deadline()).await {
                    WaitResult::Outcome(Outcome::Success(value)) => Ok(TranslateResponse {
                        choices: vec![TranslateChoice {
                            message: ResponseMessage {
                                role: "assistant",
                                content: value.as_str().unwrap_or_default().to_string(),
                            },
                        }],
                        model: req.model,
                        cached: false,
                        usage: None,
                    }),
                    WaitResult::Outcome(Outcome::Failed(message)) => Err(ProxyError::Upstream {
                        category: ErrorCategory::UnknownError,
                        message,
                    }),
                    WaitResult::Outcome(Outcome::Cancelled) | WaitResult::TimedOut => {
                        // the owner disappeared without publishing, or took longer
                        // than the upstream deadline; make our own call rather than
                        // claim a new dedup slot.
                        self.call_upstream_batch(&req, &client_id, None).await
                    }
                }
            }
        }
    }

    async fn call_upstream_batch(
        &self,
        req: &TranslateRequest,
        client_id: &str,
        fingerprint: Option<Fingerprint>,
    ) -> Result<TranslateResponse, ProxyError> {
        let _permit = self.concurrency_gate.acquire().await;
        let messages = req.resolved_messages();

        let result = self
            .upstream
            .send_batch(
                &req.target_endpoint,
                &req.username,
                &req.password,
                &req.model,
                &messages,
                req.temperature,
                req.top_p,
                self.config.content_field(),
            )
            .await;

        match result {
            Ok(content) => {
                let translations: Option<Vec<String>> = serde_json::from_str(&content).ok();

                if let (Some(translations), Some(texts)) = (&translations, req.extract_texts()) {
                    if translations.len() != texts.len() {
                        return Err(ProxyError::Upstream {
                            category: ErrorCategory::UnknownError,
                            message: format!(
                                "upstream returned {} translations for {} input texts",
                                translations.len(),
                                texts.len()
                            ),
                        });
                    }
                }

                if let Some(validator) = &self.quality_validator {
                    if let Some(translations) = &translations {
                        if !validator(translations) {
                            return Err(ProxyError::Upstream {
                                category: ErrorCategory::BadRequest,
                                message: "translated batch failed quality validation".to_string(),
                            });
                        }
                    }
                }

                self.auth_limiter.record_success(client_id);
                if let (Some(fingerprint), Some(translations)) = (fingerprint, &translations) {
                    self.cache.put(fingerprint, json!(translations)).await;
                }

                Ok(TranslateResponse {
                    choices: vec![TranslateChoice {
                        message: ResponseMessage { role: "assistant", content },
                    }],
                    model: req.model.clone(),
                    cached: false,
                    usage: None,
                })
            }
            Err(err) => {
                warn!(client_id, category = ?err.category(), "upstream call failed");
                Err(self.apply_auth_hint(client_id, err))
            }
        }
    }

    /// On a 401/403, record the failure against the auth limiter and fold
    /// the attempts-remaining (or account-locked) hint into the error
    /// message. Any other category passes through unchanged.
    fn apply_auth_hint(&self, client_id: &str, err: ProxyError) -> ProxyError {
        if !matches!(err.category(), ErrorCategory::Unauthorized | ErrorCategory::Forbidden) {
            return err;
        }
        let (now_locked, attempts_left) = self.auth_limiter.record_failure(client_id);
        let hint = if now_locked {
            "account locked".to_string()
        } else {
            format!("{attempts_left} attempts left")
        };
        err.with_hint(hint)
    }

    /// Handle a streaming translate request, returning a stream of
    /// per-item translation events. Concurrent requests sharing a
    /// fingerprint coalesce onto a single upstream stream: the first caller
    /// becomes the owner and fans its items out over a broadcast channel;
    /// later callers subscribe to that same channel instead of opening
    /// their own upstream connection.
    pub async fn handle_streaming(
        self: &Arc<Self>,
        req: TranslateRequest,
    ) -> Result<ReceiverStream<Result<StreamItem, ProxyError>>, ProxyError> {
        self.metrics.record_request();
        self.admit(&req)?;
        let client_id = self.client_id(&req);
        let (_language, fingerprint) = self.resolve_fingerprint(&req);

        if let Some(fingerprint) = fingerprint {
            if let Some(cached) = self.cache.get(&fingerprint).await {
                if let Ok(translations) = serde_json::from_value::<Vec<String>>(cached) {
                    let (tx, rx) = tokio::sync::mpsc::channel(translations.len().max(1));
                    for (index, translation) in translations.into_iter().enumerate() {
                        let _ = tx
                            .send(Ok(StreamItem {
                                index,
                                translation,
                                cached: true,
                            }))
                            .await;
                    }
                    self.metrics.record_success(0);
                    return Ok(ReceiverStream::new(rx));
                }
            }

            if self.config.dedup_enabled {
                return match self.stream_dedup.acquire(fingerprint) {
                    StreamAcquired::Owner(owner) => {
                        self.become_streaming_owner(req, client_id, fingerprint, owner).await
                    }
                    StreamAcquired::Waiter(receiver) => Ok(Self::bridge_broadcast(receiver)),
                };
            }
        }

        self.stream_direct(req, client_id, fingerprint).await
    }

    /// Make the real upstream call for a coalesced fingerprint, fan its
    /// items out to the broadcast channel every waiter subscribed to, and
    /// cache the finished translations.
    async fn become_streaming_owner(
        self: &Arc<Self>,
        req: TranslateRequest,
        client_id: String,
        fingerprint: Fingerprint,
        owner: StreamOwnerHandle,
    ) -> Result<ReceiverStream<Result<StreamItem, ProxyError>>, ProxyError> {
        let _permit = self.concurrency_gate.acquire().await;
        let messages = req.resolved_messages();

        let upstream_stream = match self
            .upstream
            .send_streaming(
                &req.target_endpoint,
                &req.username,
                &req.password,
                &req.model,
                &messages,
                req.temperature,
                req.top_p,
                self.config.content_field(),
            )
            .await
        {
            Ok(stream) => {
                self.auth_limiter.record_success(&client_id);
                self.metrics.record_success(0);
                stream
            }
            Err(err) => {
                warn!(client_id, category = ?err.category(), "upstream streaming call failed");
                self.metrics.record_failure();
                let err = self.apply_auth_hint(&client_id, err);
                owner.publish(StreamEvent::Failed(err.message()));
                return Err(err);
            }
        };

        let receiver = owner.subscribe();
        let texts = req.extract_texts();
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.forward_streaming_items(upstream_stream, fingerprint, texts, &owner).await;
        });

        Ok(Self::bridge_broadcast(receiver))
    }

    /// Drain the upstream item stream, publishing each to the owner's
    /// broadcast channel, and insert into the cache on a length-matching
    /// completion — the streaming counterpart to [`Self::call_upstream_batch`]'s
    /// cache insertion.
    async fn forward_streaming_items(
        self: Arc<Self>,
        mut upstream_stream: ReceiverStream<Result<String, ProxyError>>,
        fingerprint: Fingerprint,
        texts: Option<Vec<String>>,
        owner: &StreamOwnerHandle,
    ) {
        use tokio_stream::StreamExt;
        let mut translations = Vec::new();
        while let Some(item) = upstream_stream.next().await {
            match item {
                Ok(translation) => {
                    let index = translations.len();
                    translations.push(translation.clone());
                    owner.publish(StreamEvent::Item { index, translation });
                }
                Err(err) => {
                    owner.publish(StreamEvent::Failed(err.message()));
                    return;
                }
            }
        }

        if let Some(texts) = texts {
            if texts.len() == translations.len() {
                self.cache.put(fingerprint, json!(translations)).await;
            }
        }
        owner.publish(StreamEvent::Done { total: translations.len() });
    }

    /// Run the upstream call without coalescing: used when deduplication is
    /// disabled or the request texts didn't parse into a fingerprint. Still
    /// caches a length-matching completion so a later identical request can
    /// hit the cache even though this one bypassed the dedup map.
    async fn stream_direct(
        self: &Arc<Self>,
        req: TranslateRequest,
        client_id: String,
        fingerprint: Option<Fingerprint>,
    ) -> Result<ReceiverStream<Result<StreamItem, ProxyError>>, ProxyError> {
        let _permit = self.concurrency_gate.acquire().await;
        let messages = req.resolved_messages();

        let upstream_stream = match self
            .upstream
            .send_streaming(
                &req.target_endpoint,
                &req.username,
                &req.password,
                &req.model,
                &messages,
                req.temperature,
                req.top_p,
                self.config.content_field(),
            )
            .await
        {
            Ok(stream) => {
                self.auth_limiter.record_success(&client_id);
                self.metrics.record_success(0);
                stream
            }
            Err(err) => {
                warn!(client_id, category = ?err.category(), "upstream streaming call failed");
                self.metrics.record_failure();
                return Err(self.apply_auth_hint(&client_id, err));
            }
        };

        let texts = req.extract_texts();
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            use tokio_stream::StreamExt;
            let mut upstream_stream = upstream_stream;
            let mut translations = Vec::new();
            while let Some(item) = upstream_stream.next().await {
                match item {
                    Ok(translation) => {
                        let index = translations.len();
                        translations.push(translation.clone());
                        if tx
                            .send(Ok(StreamItem { index, translation, cached: false }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
            if let (Some(fingerprint), Some(texts)) = (fingerprint, texts) {
                if texts.len() == translations.len() {
                    pipeline.cache.put(fingerprint, json!(translations)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Bridge a broadcast receiver (either the owner's or a waiter's) into
    /// the `mpsc`-backed `ReceiverStream` the HTTP layer consumes.
    fn bridge_broadcast(
        mut receiver: tokio::sync::broadcast::Receiver<StreamEvent>,
    ) -> ReceiverStream<Result<StreamItem, ProxyError>> {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(StreamEvent::Item { index, translation }) => {
                        let sent = tx
                            .send(Ok(StreamItem { index, translation, cached: false }))
                            .await;
                        if sent.is_err() {
                            return;
                        }
                    }
                    Ok(StreamEvent::Failed(message)) => {
                        let _ = tx
                            .send(Err(ProxyError::Upstream {
                                category: ErrorCategory::UnknownError,
                                message,
                            }))
                            .await;
                        return;
                    }
                    Ok(StreamEvent::Done { .. }) => return,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

/// Infer the target language from the system prompt when the caller didn't
/// supply one explicitly. Looks for the phrasing "into <Language>"; falls
/// back to "English" when nothing matches.
fn infer_target_language(req: &TranslateRequest) -> String {
    let Some(prompt) = &req.system_prompt else {
        return "English".to_string();
    };
    let lower = prompt.to_ascii_lowercase();
    let marker = "into ";
    if let Some(idx) = lower.find(marker) {
        let tail = prompt[idx + marker.len()..].trim();
        let word: String = tail.chars().take_while(|c| c.is_alphabetic()).collect();
        if !word.is_empty() {
            return word;
        }
    }
    "English".to_string()
}
