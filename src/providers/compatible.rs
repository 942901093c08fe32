//! OpenAI-compatible chat completions client.
//! DeepSeek, OpenAI and most hosted model APIs accept the same
//! `/chat/completions` request and `data:` SSE stream format.

use crate::providers::traits::{
    ChatMessage, FragmentStream, Provider, StreamError, StreamResult,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Everything needed to reach the completion endpoint.
///
/// Passed to [`OpenAiCompatibleProvider::new`]; there is no process-wide client.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            name: "deepseek".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

pub struct OpenAiCompatibleProvider {
    config: CompletionConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE line. Returns the delta text, if any.
/// Handles the `data: {...}` format and `[DONE]` sentinel.
fn parse_sse_line(line: &str) -> StreamResult<Option<String>> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(None);
        }

        let chunk: StreamChunkResponse = serde_json::from_str(data).map_err(StreamError::Json)?;
        if let Some(content) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
        {
            if !content.is_empty() {
                return Ok(Some(content));
            }
        }
    }

    Ok(None)
}

fn is_done_line(line: &str) -> bool {
    line.trim()
        .strip_prefix("data:")
        .is_some_and(|data| data.trim() == "[DONE]")
}

/// Turn an SSE response body into text fragments.
///
/// A producer task reads the body and forwards fragments over a bounded
/// channel, so the consumer sees them in arrival order.
fn sse_bytes_to_fragments(response: reqwest::Response) -> FragmentStream<'static> {
    let (tx, rx) = tokio::sync::mpsc::channel::<StreamResult<String>>(100);

    tokio::spawn(async move {
        // Incomplete trailing line; bytes so multi-byte characters may straddle chunks.
        let mut buffer: Vec<u8> = Vec::new();
        let mut bytes_stream = response.bytes_stream();

        while let Some(item) = bytes_stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(StreamError::Http(e))).await;
                    return;
                }
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx
                            .send(Err(StreamError::InvalidSse(format!("Invalid UTF-8: {e}"))))
                            .await;
                        return;
                    }
                };

                if is_done_line(&line) {
                    return;
                }
                match parse_sse_line(&line) {
                    Ok(Some(content)) => {
                        if tx.send(Ok(content)).await.is_err() {
                            return; // Receiver dropped
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        // Body ended without a trailing newline.
        if let Ok(line) = String::from_utf8(buffer) {
            if let Ok(Some(content)) = parse_sse_line(&line) {
                let _ = tx.send(Ok(content)).await;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|fragment| (fragment, rx))
    })
    .boxed()
}

fn parse_chat_response_body(provider_name: &str, body: &str) -> anyhow::Result<ApiChatResponse> {
    serde_json::from_str::<ApiChatResponse>(body).map_err(|error| {
        let snippet = super::sanitize_api_error(body);
        anyhow::anyhow!(
            "{provider_name} API returned an unexpected chat-completions payload: {error}; body={snippet}"
        )
    })
}

impl OpenAiCompatibleProvider {
    pub fn new(config: CompletionConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!("Failed to build HTTP client with timeouts: {error}");
                Client::new()
            });
        let config = CompletionConfig {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ..config
        };
        Self { config, client }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Full chat completions URL; a base that already ends in the path is used as-is.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.config.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| self.config.base_url.ends_with("/chat/completions"));

        if has_full_endpoint {
            self.config.base_url.clone()
        } else {
            format!("{}/chat/completions", self.config.base_url)
        }
    }

    fn credential(&self) -> anyhow::Result<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{} API key not set. Set api_key in config.toml or CHATRELAY_API_KEY.",
                    self.config.name
                )
            })
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ApiChatRequest<'a> {
        ApiChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let credential = self.credential()?;
        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(credential)
            .json(&self.request(messages, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.config.name, response).await);
        }

        let body = response.text().await?;
        let chat_response = parse_chat_response_body(&self.config.name, &body)?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow::anyhow!("No response from {}", self.config.name))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn stream_chat(&self, messages: &[ChatMessage]) -> FragmentStream<'static> {
        let credential = match self.credential() {
            Ok(value) => value.to_string(),
            Err(err) => {
                let message = err.to_string();
                return stream::once(async move { Err(StreamError::Provider(message)) }).boxed();
            }
        };

        let body = match serde_json::to_value(self.request(messages, true)) {
            Ok(body) => body,
            Err(err) => return stream::once(async move { Err(StreamError::Json(err)) }).boxed(),
        };
        let request = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(credential)
            .header("Accept", "text/event-stream")
            .json(&body);
        let name = self.config.name.clone();

        stream::once(async move {
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => return stream::once(async move { Err(StreamError::Http(e)) }).boxed(),
            };

            if !response.status().is_success() {
                let message = super::api_error(&name, response).await.to_string();
                return stream::once(async move { Err(StreamError::Provider(message)) }).boxed();
            }

            sse_bytes_to_fragments(response)
        })
        .flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::traits::complete;
    use futures_util::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(base_url: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(CompletionConfig {
            name: "test".into(),
            base_url: base_url.into(),
            api_key: Some("sk-test".into()),
            model: "test-model".into(),
            ..CompletionConfig::default()
        })
    }

    fn sse_body(parts: &[&str]) -> String {
        let mut body = String::new();
        for part in parts {
            let chunk = serde_json::json!({"choices":[{"delta":{"content": part}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn parse_sse_line_with_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"hello"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn parse_sse_line_skips_empty_content_and_role_only_deltas() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#).unwrap(),
            None
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            None
        );
    }

    #[test]
    fn parse_sse_line_done_sentinel_and_comments() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), None);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("").unwrap(), None);
        assert!(is_done_line("data: [DONE]\n"));
    }

    #[test]
    fn parse_sse_line_rejects_invalid_json() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(StreamError::Json(_))
        ));
    }

    #[test]
    fn chat_completions_url_appends_path_once() {
        assert_eq!(
            provider_for("https://api.deepseek.com/").chat_completions_url(),
            "https://api.deepseek.com/chat/completions"
        );
        assert_eq!(
            provider_for("https://api.example.com/v1/chat/completions").chat_completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn stream_chat_yields_fragments_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"stream": true, "model": "test-model"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hel", "", "lo ", "wörld"])),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let messages = vec![ChatMessage::user("hi")];
        let fragments: Vec<String> = complete(&provider, &messages, true)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["Hel", "lo ", "wörld"]);
    }

    #[tokio::test]
    async fn chat_returns_full_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "complete answer"}}]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let messages = vec![ChatMessage::user("hi")];
        let fragments: Vec<String> = complete(&provider, &messages, false)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["complete answer"]);
    }

    #[tokio::test]
    async fn stream_chat_surfaces_sanitized_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":"bad key sk-live-abcdefghijklmnop"}"#),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let messages = vec![ChatMessage::user("hi")];
        let err = complete(&provider, &messages, true)
            .try_collect::<Vec<String>>()
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("401"), "{text}");
        assert!(text.contains("[REDACTED]"), "{text}");
        assert!(!text.contains("sk-live-abcdefghijklmnop"));
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let provider = OpenAiCompatibleProvider::new(CompletionConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            ..CompletionConfig::default()
        });
        let messages = vec![ChatMessage::user("hi")];

        let err = provider.chat(&messages).await.unwrap_err();
        assert!(err.to_string().contains("API key not set"));

        let streamed = complete(&provider, &messages, true)
            .try_collect::<Vec<String>>()
            .await;
        assert!(matches!(streamed, Err(StreamError::Provider(_))));
    }
}
