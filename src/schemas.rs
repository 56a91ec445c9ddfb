//! Request/response shapes for the translation proxy's HTTP surface.
//!
//! - **Option<T>**: similar to `std::optional<T>`.
//! - **serde**: Rust's serialization framework, analogous to nlohmann/json.

use serde::{Deserialize, Serialize};

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.9
}

fn default_stream() -> bool {
    false
}

/// Body of `POST /proxy/translate`.
///
/// Either `messages` is supplied directly, or `system_prompt` +
/// `user_input` are supplied and assembled into a two-message conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslateRequest {
    pub target_endpoint: String,
    pub username: String,
    pub password: String,
    pub model: String,

    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,

    /// Free-form hint for the target language; when absent, callers rely on
    /// the target-language inference regex run over `system_prompt`.
    #[serde(default)]
    pub target_language: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl TranslateRequest {
    /// Resolve the conversation to send upstream, combining `messages` with
    /// the `system_prompt`/`user_input` pair when both are present.
    pub fn resolved_messages(&self) -> Vec<Message> {
        if let Some(messages) = &self.messages {
            return messages.clone();
        }
        let mut out = Vec::new();
        if let Some(system) = &self.system_prompt {
            out.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        if let Some(user) = &self.user_input {
            out.push(Message {
                role: "user".to_string(),
                content: user.clone(),
            });
        }
        out
    }

    /// The raw user-text field: `user_input` if present, otherwise the
    /// content of the last `user`-role message in `messages`.
    fn user_text_field(&self) -> Option<&str> {
        if let Some(user) = &self.user_input {
            return Some(user.as_str());
        }
        self.messages
            .as_ref()?
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }

    /// Parse the user-text field as a JSON array of strings — the batch of
    /// HTML fragments to translate. Returns `None` if the field is absent or
    /// isn't a well-formed JSON string array, in which case callers should
    /// skip cache lookup and deduplication entirely.
    pub fn extract_texts(&self) -> Option<Vec<String>> {
        serde_json::from_str::<Vec<String>>(self.user_text_field()?).ok()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Batch (non-streaming) response envelope returned by `POST
/// /proxy/translate` when `stream` is false.
#[derive(Debug, Clone, Serialize)]
pub struct TranslateResponse {
    pub choices: Vec<TranslateChoice>,
    pub model: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateChoice {
    pub message: ResponseMessage,
}

/// `content` carries the translated batch as a JSON-array-of-strings
/// string, passed through unchanged from upstream on a fresh call, or
/// re-serialized from the cached translation array on a cache hit.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// `GET /health` response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub instance_id: String,
}

/// `GET /stats` response, aggregating every component's own counters.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub uptime_seconds: f64,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub dedup_in_flight: usize,
    pub rate_limiter_rejections: u64,
    pub rate_limiter_tracked_clients: usize,
    pub concurrency_available_permits: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
}
