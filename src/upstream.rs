//! Upstream LLM HTTP client.
//!
//! A pooled `reqwest::Client`, with Basic auth sourced from the inbound
//! request rather than static configuration. The streaming response is an
//! SSE body: each line is stripped of its optional `data: ` prefix, `[DONE]`
//! ends the stream, and the remaining JSON frame's delta/content field
//! (per `delta_field`) is extracted before the accumulated text is fed
//! through [`crate::streaming_parser`] to pull out complete translated
//! strings.

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ContentField;
use crate::error::{classify_upstream, ErrorCategory, ProxyError};
use crate::schemas::Message;
use crate::streaming_parser::StreamingArrayParser;

/// Upstream LLM client bound to a shared, pooled `reqwest::Client`.
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build_body(messages: &[Message], model: &str, temperature: f32, top_p: f32, stream: bool) -> Value {
        json!({
            "model": model,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "temperature": temperature,
            "top_p": top_p,
            "stream": stream,
        })
    }

    /// Issue a non-streaming request and resolve the translated text using
    /// `delta_field`'s configured resolution order.
    pub async fn send_batch(
        &self,
        target_endpoint: &str,
        username: &str,
        password: &str,
        model: &str,
        messages: &[Message],
        temperature: f32,
        top_p: f32,
        delta_field: ContentField,
    ) -> Result<String, ProxyError> {
        let body = Self::build_body(messages, model, temperature, top_p, false);

        let response = self
            .http
            .post(target_endpoint)
            .basic_auth(username, Some(password))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(ProxyError::Upstream {
                category: classify_upstream(status, &text),
                message: text,
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        resolve_content(&parsed, delta_field).ok_or_else(|| ProxyError::Upstream {
            category: ErrorCategory::UnknownError,
            message: "upstream response did not contain a recognizable content field".to_string(),
        })
    }

    /// Issue a streaming request and return a channel of translated text
    /// fragments as they complete. The upstream body is SSE: each line's
    /// optional `data: ` prefix is stripped, `[DONE]` terminates the stream,
    /// and every other line is parsed as a JSON frame and resolved through
    /// `delta_field` before the extracted text is fed to the array parser.
    pub async fn send_streaming(
        &self,
        target_endpoint: &str,
        username: &str,
        password: &str,
        model: &str,
        messages: &[Message],
        temperature: f32,
        top_p: f32,
        delta_field: ContentField,
    ) -> Result<ReceiverStream<Result<String, ProxyError>>, ProxyError> {
        let body = Self::build_body(messages, model, temperature, top_p, true);

        let response = self
            .http
            .post(target_endpoint)
            .basic_auth(username, Some(password))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream {
                category: classify_upstream(status, &text),
                message: text,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move {
            let mut parser = StreamingArrayParser::new();
            let mut line_buffer = String::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(ProxyError::from(err))).await;
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(idx) = line_buffer.find('\n') {
                    let line = line_buffer[..idx].trim().to_string();
                    line_buffer.drain(..=idx);

                    if line.is_empty() {
                        continue;
                    }
                    let data = line.strip_prefix("data: ").unwrap_or(&line);
                    if data == "[DONE]" {
                        return;
                    }

                    let Ok(frame) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    let Some(delta) = resolve_content(&frame, delta_field) else {
                        continue;
                    };
                    for item in parser.feed(&delta) {
                        if tx.send(Ok(item)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Resolve the translated text out of a parsed upstream JSON body,
/// following `delta_field`'s configured preference.
fn resolve_content(value: &Value, field: ContentField) -> Option<String> {
    let try_delta = |v: &Value| -> Option<String> {
        v.get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    };
    let try_content = |v: &Value| -> Option<String> { v.get("content")?.as_str().map(str::to_string) };
    let try_system_response = |v: &Value| -> Option<String> {
        v.get("system_response")?.as_str().map(str::to_string)
    };

    match field {
        ContentField::Delta => try_delta(value),
        ContentField::Content => try_content(value),
        ContentField::SystemResponse => try_system_response(value),
        ContentField::Auto => try_delta(value)
            .or_else(|| try_content(value))
            .or_else(|| try_system_response(value)),
    }
}
