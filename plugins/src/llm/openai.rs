use std::time::Duration;

use async_trait::async_trait;
use briefsmith_core::error::LlmError;
use briefsmith_core::llm::{ChatRequest, ChatTransport, ChunkStream};
use bytes::BytesMut;
use futures::StreamExt;
use serde_json::{json, Value};

const BODY_PREVIEW_LIMIT: usize = 512;

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let mut out = String::new();
    let mut truncated = false;
    for (idx, ch) in trimmed.chars().enumerate() {
        if idx >= BODY_PREVIEW_LIMIT {
            truncated = true;
            break;
        }
        out.push(ch);
    }

    if truncated {
        out.push_str("...");
    }

    out
}

/// Network-level failure (no HTTP status). Timeouts and connection errors
/// are transient; anything else goes through the text classifier.
fn from_reqwest(err: reqwest::Error, url: &str) -> LlmError {
    let status = err.status().map(|s| s.as_u16());
    let message = format!("{} (url={})", err, url);
    let base = if status.is_none() && (err.is_timeout() || err.is_connect() || err.is_request()) {
        LlmError::transient(message)
    } else {
        LlmError::classified(status, message)
    };
    base.with_source(err)
}

/// Pulls the provider's error message out of an error body, falling back to
/// the body preview.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| preview_body(body))
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiChatClient {
    api_key: String,
    http: reqwest::Client,
    url_chat: String,
    timeout: Duration,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: String, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let normalized = base_url.trim_end_matches('/');
        Ok(Self {
            api_key,
            http,
            url_chat: format!("{}/chat/completions", normalized),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(tuning) = request.tuning {
            if tuning.disable_thinking {
                body["enable_thinking"] = json!(false);
                body["thinking"] = json!({ "type": "disabled" });
            }
        }
        body
    }

    /// Sends the request and maps non-2xx responses to classified errors.
    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = &self.url_chat;
        tracing::debug!(
            target: "briefsmith.llm",
            stage = "openai.request",
            url = %url,
            model = %request.model,
            stream = stream,
            reduced = request.is_reduced()
        );

        let mut req = self
            .http
            .post(url)
            .json(&Self::request_body(request, stream));
        if !stream {
            req = req.timeout(self.timeout);
        }
        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| from_reqwest(err, url))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body);
        tracing::debug!(
            target: "briefsmith.llm",
            stage = "openai.status",
            status = %status,
            body = %preview_body(&body)
        );
        Err(LlmError::classified(Some(status.as_u16()), message))
    }
}

#[async_trait]
impl ChatTransport for OpenAiChatClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = &self.url_chat;
        let resp = self.send(request, false).await?;
        let body = resp.text().await.map_err(|err| from_reqwest(err, url))?;

        let value: Value = serde_json::from_str(&body).map_err(|err| {
            LlmError::invalid_response(format!(
                "failed to decode response body: {} | body={}",
                err,
                preview_body(&body)
            ))
        })?;

        if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
            return Err(LlmError::classified(None, message));
        }

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LlmError::invalid_response(format!(
                    "response has no message content | body={}",
                    preview_body(&body)
                ))
            })
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, LlmError> {
        let resp = self.send(request, true).await?;
        let url = self.url_chat.clone();
        let mut bytes = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buf = BytesMut::new();
            loop {
                let next = bytes.next().await;
                let eof = next.is_none();
                match next {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(err)) => {
                        yield Err(from_reqwest(err, &url));
                        return;
                    }
                    None => {
                        if !buf.ends_with(b"\n") {
                            buf.extend_from_slice(b"\n");
                        }
                    }
                }

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        Ok(SseEvent::Delta(text)) => yield Ok(text),
                        Ok(SseEvent::Done) => return,
                        Ok(SseEvent::Skip) => {}
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                if eof {
                    return;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent, LlmError> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let value: Value = serde_json::from_str(payload).map_err(|err| {
        LlmError::invalid_response(format!(
            "malformed stream event: {} | data={}",
            err,
            preview_body(payload)
        ))
    })?;

    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(LlmError::classified(None, message));
    }

    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(text) if !text.is_empty() => Ok(SseEvent::Delta(text.to_string())),
        _ => Ok(SseEvent::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefsmith_core::error::LlmErrorKind;
    use briefsmith_core::llm::{ChatMessage, TuningParams};
    use pretty_assertions::assert_eq;

    fn request(tuned: bool) -> ChatRequest {
        ChatRequest {
            model: "qwen3-max".to_string(),
            messages: vec![ChatMessage::user("hello")],
            temperature: Some(0.5),
            tuning: tuned.then_some(TuningParams {
                disable_thinking: true,
            }),
        }
    }

    #[test]
    fn tuning_fields_are_dropped_in_reduced_mode() {
        let tuned = OpenAiChatClient::request_body(&request(true), false);
        assert_eq!(tuned["enable_thinking"], json!(false));
        assert_eq!(tuned["thinking"], json!({"type": "disabled"}));
        assert_eq!(tuned["messages"], json!([{"role": "user", "content": "hello"}]));

        let reduced = OpenAiChatClient::request_body(&request(false), true);
        assert!(reduced.get("enable_thinking").is_none());
        assert!(reduced.get("thinking").is_none());
        assert_eq!(reduced["stream"], json!(true));
    }

    #[test]
    fn sse_lines_are_parsed() {
        assert_eq!(
            parse_sse_line("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n").unwrap(),
            SseEvent::Delta("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(
            parse_sse_line("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}").unwrap(),
            SseEvent::Skip
        );
        assert!(parse_sse_line("data: {oops").is_err());
    }

    #[tokio::test]
    async fn complete_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"a long enough answer"}}]}"#)
            .create_async()
            .await;

        let client =
            OpenAiChatClient::new(&format!("{}/v1/", server.url()), "sk-test".into(), 5_000)
                .unwrap();
        let text = client.complete(&request(true)).await.unwrap();
        assert_eq!(text, "a long enough answer");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let mut server = mockito::Server::new_async().await;
        let cases = [
            (429, r#"{"error":{"message":"slow down"}}"#, LlmErrorKind::RateLimit),
            (503, "upstream overloaded", LlmErrorKind::Transient),
            (401, r#"{"error":{"message":"bad key"}}"#, LlmErrorKind::Fatal),
            (
                400,
                r#"{"error":{"message":"Unrecognized request argument: enable_thinking"}}"#,
                LlmErrorKind::ParameterIncompatible,
            ),
        ];
        let client = OpenAiChatClient::new(&server.url(), String::new(), 5_000).unwrap();

        for (status, body, kind) in cases {
            let mock = server
                .mock("POST", "/chat/completions")
                .with_status(status)
                .with_body(body)
                .create_async()
                .await;
            let err = client.complete(&request(true)).await.unwrap_err();
            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(err.status(), Some(status as u16));
            mock.remove_async().await;
        }
    }

    #[tokio::test]
    async fn missing_content_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;
        let client = OpenAiChatClient::new(&server.url(), String::new(), 5_000).unwrap();
        let err = client.complete(&request(false)).await.unwrap_err();
        assert_eq!(err.kind(), LlmErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn stream_yields_deltas_until_done() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            ": ping\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAiChatClient::new(&server.url(), String::new(), 5_000).unwrap();
        let stream = client.open_stream(&request(true)).await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hello".to_string(), ", world".to_string()]);
    }

    #[tokio::test]
    async fn stream_status_error_fails_before_first_chunk() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("too many requests")
            .create_async()
            .await;
        let client = OpenAiChatClient::new(&server.url(), String::new(), 5_000).unwrap();
        let err = match client.open_stream(&request(true)).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), LlmErrorKind::RateLimit);
    }
}
