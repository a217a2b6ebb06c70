//! Resilient chat-completion invocation.
//!
//! One logical call walks the candidate models in order. Each model gets at
//! most two attempts: the first with its optional tuning fields, a second
//! without them when the remote rejects those fields. Rate limits, transient
//! remote failures and unusable responses move on to the next model; fatal
//! errors abort immediately. Nothing is ever replaced with placeholder text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;

use super::backoff::FailoverBackoff;
use super::cascade::{candidate_models, ThinkingPolicy};
use super::traits::{ChatTransport, ChunkStream};
use super::types::{AttemptOutcome, ChatMessage, ChatRequest, InvocationAttempt, TuningParams};
use crate::config::LlmConfig;
use crate::error::{ConfigError, LlmError, LlmErrorKind};

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub timeout: Duration,
    pub stream_timeout: Duration,
    pub min_response_chars: usize,
    pub thinking: ThinkingPolicy,
    pub temperature: Option<f32>,
    pub backoff: FailoverBackoff,
}

impl InvokerSettings {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            default_model: cfg.default_model.clone(),
            fallback_models: cfg.fallback_models.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
            stream_timeout: Duration::from_millis(cfg.stream_timeout_ms),
            min_response_chars: cfg.min_response_chars,
            thinking: ThinkingPolicy::new(&cfg.thinking_model_patterns)?,
            temperature: Some(cfg.temperature),
            backoff: FailoverBackoff::new(cfg.failover_base_delay_ms, cfg.failover_max_delay_ms),
        })
    }
}

#[derive(Clone)]
pub struct ModelInvoker {
    transport: Arc<dyn ChatTransport>,
    settings: InvokerSettings,
}

impl ModelInvoker {
    pub fn new(transport: Arc<dyn ChatTransport>, settings: InvokerSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    pub fn candidates(&self, requested: Option<&str>) -> Vec<String> {
        candidate_models(
            requested,
            &self.settings.default_model,
            &self.settings.fallback_models,
        )
    }

    fn build_request(&self, model: &str, messages: &[ChatMessage], reduced: bool) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: self.settings.temperature,
            tuning: (!reduced).then_some(TuningParams {
                disable_thinking: true,
            }),
        }
    }

    fn check_length(&self, model: &str, text: &str) -> Result<(), LlmError> {
        let chars = text.trim().chars().count();
        if chars < self.settings.min_response_chars {
            return Err(LlmError::invalid_response(format!(
                "response too short: {} chars (minimum {})",
                chars, self.settings.min_response_chars
            ))
            .with_model(model));
        }
        Ok(())
    }

    /// Runs one candidate with the bounded parameter-compatibility retry.
    ///
    /// `validate` sees every response that passed the length check and its
    /// error counts as the attempt's outcome. On success returns the
    /// validated value, the response length and whether the accepted request
    /// went out without tuning fields.
    async fn attempt_model<R, V>(
        &self,
        model: &str,
        messages: &[ChatMessage],
        validate: &V,
        attempts: &mut Vec<InvocationAttempt>,
    ) -> Result<(R, usize, bool), LlmError>
    where
        V: Fn(&str) -> Result<R, LlmError>,
    {
        let mut reduced = !self.settings.thinking.applies_to(model);
        loop {
            let request = self.build_request(model, messages, reduced);
            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.settings.timeout,
                self.transport.complete(&request),
            )
            .await
            {
                Ok(res) => res.and_then(|text| {
                    self.check_length(model, &text)?;
                    tracing::trace!(target: "briefsmith.llm", model = %model, response = %text);
                    validate(text.as_str()).map(|value| (value, text.chars().count()))
                }),
                Err(_) => Err(LlmError::transient(format!(
                    "request timed out after {} ms",
                    self.settings.timeout.as_millis()
                ))),
            };
            let result = result.map_err(|err| attach_model(err, model));
            attempts.push(record_attempt(model, reduced, &result, started));

            match result {
                Ok((value, response_chars)) => return Ok((value, response_chars, reduced)),
                Err(err) if !reduced && err.kind() == LlmErrorKind::ParameterIncompatible => {
                    tracing::warn!(
                        target: "briefsmith.llm",
                        stage = "invoke.reduced_retry",
                        model = %model,
                        error = %err
                    );
                    reduced = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Executes one chat completion across the candidate cascade.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        requested_model: Option<&str>,
    ) -> Result<String, LlmError> {
        self.chat_completion_with(messages, requested_model, |text| Ok(text.to_string()))
            .await
    }

    /// Like [`chat_completion`](Self::chat_completion), but a response only
    /// counts once `validate` accepts it. A rejection with a failover-worthy
    /// kind (normally [`LlmErrorKind::InvalidResponse`]) moves on to the
    /// next candidate the same way a too-short response does.
    pub async fn chat_completion_with<R, V>(
        &self,
        messages: &[ChatMessage],
        requested_model: Option<&str>,
        validate: V,
    ) -> Result<R, LlmError>
    where
        V: Fn(&str) -> Result<R, LlmError>,
    {
        let candidates = self.candidates(requested_model);
        let started = Instant::now();
        let mut attempts: Vec<InvocationAttempt> = Vec::new();
        let mut last_error: Option<LlmError> = None;

        for (idx, model) in candidates.iter().enumerate() {
            if idx > 0 {
                self.pause_before_failover(idx as u32 - 1).await;
            }
            match self
                .attempt_model(model, messages, &validate, &mut attempts)
                .await
            {
                Ok((value, response_chars, reduced)) => {
                    tracing::info!(
                        target: "briefsmith.llm",
                        stage = "invoke.ok",
                        transport = %self.transport.name(),
                        model = %model,
                        message_count = messages.len(),
                        prompt_chars = prompt_chars(messages),
                        response_chars = response_chars,
                        reduced = reduced,
                        attempts = attempts.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64
                    );
                    return Ok(value);
                }
                Err(err) if err.is_failover_worthy() => {
                    tracing::warn!(
                        target: "briefsmith.llm",
                        stage = "invoke.failover",
                        model = %model,
                        kind = %err.kind(),
                        next = candidates.get(idx + 1).map(String::as_str).unwrap_or("<none>"),
                        error = %err
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    tracing::error!(
                        target: "briefsmith.llm",
                        stage = "invoke.fatal",
                        model = %model,
                        kind = %err.kind(),
                        attempts = ?attempts,
                        error = %err
                    );
                    return Err(err);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| LlmError::fatal("no candidate models configured"));
        tracing::error!(
            target: "briefsmith.llm",
            stage = "invoke.exhausted",
            candidates = candidates.len(),
            attempts = ?attempts,
            error = %err
        );
        Err(err)
    }

    /// Opens a streamed completion across the candidate cascade.
    ///
    /// Failover happens only until the first non-empty chunk arrives. After
    /// that, failures are yielded to the consumer as stream items. A stream
    /// whose total length stays under the minimum ends with an
    /// `InvalidResponse` item.
    pub async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        requested_model: Option<&str>,
    ) -> Result<ChunkStream, LlmError> {
        let candidates = self.candidates(requested_model);
        let mut attempts: Vec<InvocationAttempt> = Vec::new();
        let mut last_error: Option<LlmError> = None;

        for (idx, model) in candidates.iter().enumerate() {
            if idx > 0 {
                self.pause_before_failover(idx as u32 - 1).await;
            }
            match self.establish_stream(model, messages, &mut attempts).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_failover_worthy() => {
                    tracing::warn!(
                        target: "briefsmith.llm",
                        stage = "stream.failover",
                        model = %model,
                        kind = %err.kind(),
                        next = candidates.get(idx + 1).map(String::as_str).unwrap_or("<none>"),
                        error = %err
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    tracing::error!(
                        target: "briefsmith.llm",
                        stage = "stream.fatal",
                        model = %model,
                        attempts = ?attempts,
                        error = %err
                    );
                    return Err(err);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| LlmError::fatal("no candidate models configured"));
        tracing::error!(
            target: "briefsmith.llm",
            stage = "stream.exhausted",
            candidates = candidates.len(),
            attempts = ?attempts,
            error = %err
        );
        Err(err)
    }

    async fn establish_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        attempts: &mut Vec<InvocationAttempt>,
    ) -> Result<ChunkStream, LlmError> {
        let mut reduced = !self.settings.thinking.applies_to(model);
        loop {
            let request = self.build_request(model, messages, reduced);
            let started = Instant::now();
            let deadline = tokio::time::Instant::now() + self.settings.stream_timeout;
            let result = match tokio::time::timeout_at(deadline, self.first_chunk(&request)).await
            {
                Ok(res) => res,
                Err(_) => Err(LlmError::transient(format!(
                    "stream produced no output within {} ms",
                    self.settings.stream_timeout.as_millis()
                ))),
            }
            .map_err(|err| attach_model(err, model));

            attempts.push(record_attempt(model, reduced, &result, started));

            match result {
                Ok((first, rest)) => {
                    tracing::info!(
                        target: "briefsmith.llm",
                        stage = "stream.open",
                        transport = %self.transport.name(),
                        model = %model,
                        message_count = messages.len(),
                        prompt_chars = prompt_chars(messages),
                        reduced = reduced,
                        first_chunk_ms = started.elapsed().as_millis() as u64
                    );
                    return Ok(self.continue_stream(model, first, rest, deadline, started));
                }
                Err(err) if !reduced && err.kind() == LlmErrorKind::ParameterIncompatible => {
                    tracing::warn!(
                        target: "briefsmith.llm",
                        stage = "stream.reduced_retry",
                        model = %model,
                        error = %err
                    );
                    reduced = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Opens the stream and pulls until the first non-empty chunk.
    async fn first_chunk(&self, request: &ChatRequest) -> Result<(String, ChunkStream), LlmError> {
        let mut stream = self.transport.open_stream(request).await?;
        while let Some(item) = stream.next().await {
            let chunk = item?;
            if !chunk.is_empty() {
                return Ok((chunk, stream));
            }
        }
        Err(LlmError::invalid_response("stream ended without content"))
    }

    fn continue_stream(
        &self,
        model: &str,
        first: String,
        mut rest: ChunkStream,
        deadline: tokio::time::Instant,
        started: Instant,
    ) -> ChunkStream {
        let model = model.to_string();
        let min_chars = self.settings.min_response_chars;
        let timeout_ms = self.settings.stream_timeout.as_millis() as u64;

        let stream = async_stream::stream! {
            let mut total_chars = first.chars().count();
            yield Ok(first);

            loop {
                match tokio::time::timeout_at(deadline, rest.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        total_chars += chunk.chars().count();
                        yield Ok(chunk);
                    }
                    Ok(Some(Err(err))) => {
                        let err = attach_model(err, &model);
                        tracing::warn!(
                            target: "briefsmith.llm",
                            stage = "stream.broken",
                            model = %model,
                            delivered_chars = total_chars,
                            error = %err
                        );
                        yield Err(err);
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(LlmError::transient(format!(
                            "stream exceeded {} ms",
                            timeout_ms
                        ))
                        .with_model(model.clone()));
                        return;
                    }
                }
            }

            if total_chars < min_chars {
                yield Err(LlmError::invalid_response(format!(
                    "streamed response too short: {} chars (minimum {})",
                    total_chars, min_chars
                ))
                .with_model(model.clone()));
                return;
            }

            tracing::info!(
                target: "briefsmith.llm",
                stage = "stream.done",
                model = %model,
                response_chars = total_chars,
                elapsed_ms = started.elapsed().as_millis() as u64
            );
        };
        Box::pin(stream)
    }

    async fn pause_before_failover(&self, failover: u32) {
        let delay = self.settings.backoff.delay(failover);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn attach_model(err: LlmError, model: &str) -> LlmError {
    if err.model().is_some() {
        err
    } else {
        err.with_model(model)
    }
}

fn prompt_chars(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.chars().count()).sum()
}

fn record_attempt<T>(
    model: &str,
    reduced: bool,
    result: &Result<T, LlmError>,
    started: Instant,
) -> InvocationAttempt {
    let outcome = match result {
        Ok(_) => AttemptOutcome::Success,
        Err(err) if err.is_failover_worthy() => AttemptOutcome::Retryable(err.kind()),
        Err(err) => AttemptOutcome::Fatal(err.kind()),
    };
    let attempt = InvocationAttempt {
        model: model.to_string(),
        reduced,
        outcome,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::debug!(target: "briefsmith.llm", stage = "invoke.attempt", attempt = ?attempt);
    attempt
}
