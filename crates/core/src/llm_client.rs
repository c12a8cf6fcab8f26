use crate::error::{Result, TutorError};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone, PartialEq)]
pub enum LLMStreamEvent {
    TextChunk(String),
    /// The service reported that the completion is finished.
    Done,
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent>> + Send>>;

/// An opaque text-completion capability.
///
/// The orchestrator sends one fully assembled instruction and gets text back,
/// either all at once or incrementally. No tool calls are issued.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Makes a single, non-streaming call and returns the whole completion.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Makes a streaming call. The stream ends with [`LLMStreamEvent::Done`]
    /// when the service finished normally.
    async fn stream(&self, prompt: &str) -> Result<LLMStream>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One frame of Ollama's `/api/generate` output.
#[derive(Deserialize, Debug)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Parses one newline-delimited frame into stream events.
fn parse_frame(line: &str) -> Result<Vec<LLMStreamEvent>> {
    let frame: GenerateFrame = serde_json::from_str(line)
        .map_err(|e| TutorError::UpstreamMalformed(format!("corrupt stream frame: {}", e)))?;
    if let Some(error) = frame.error {
        return Err(TutorError::UpstreamUnavailable(error));
    }
    let mut events = Vec::with_capacity(2);
    if !frame.response.is_empty() {
        events.push(LLMStreamEvent::TextChunk(frame.response));
    }
    if frame.done {
        events.push(LLMStreamEvent::Done);
    }
    Ok(events)
}

/// A client for a local Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
        }
    }

    async fn post(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream,
            })
            .send()
            .await
            .map_err(|e| TutorError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "Generation service returned an error status");
            return Err(TutorError::UpstreamUnavailable(format!(
                "generation service returned {}",
                status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.post(prompt, false).await?;
        let body = response
            .text()
            .await
            .map_err(|e| TutorError::UpstreamUnavailable(e.to_string()))?;
        let frame: GenerateFrame = serde_json::from_str(&body)
            .map_err(|e| TutorError::UpstreamMalformed(e.to_string()))?;
        if let Some(error) = frame.error {
            return Err(TutorError::UpstreamUnavailable(error));
        }
        Ok(frame.response)
    }

    async fn stream(&self, prompt: &str) -> Result<LLMStream> {
        let response = self.post(prompt, true).await?;
        Ok(ndjson_stream(response.bytes_stream()))
    }
}

/// Raw bytes of an NDJSON body, split into lines only at `\n`.
///
/// Network chunks can end inside a multi-byte character, so nothing is
/// decoded until a whole line is buffered.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Result<String>> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(decode_line(&line[..end]))
    }

    /// Whatever is left once the body ends without a final newline.
    fn finish(self) -> Option<Result<String>> {
        if self.bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(decode_line(&self.bytes))
        }
    }
}

fn decode_line(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(|line| line.trim().to_string())
        .map_err(|e| TutorError::UpstreamMalformed(format!("stream frame is not UTF-8: {}", e)))
}

/// Turns an NDJSON byte stream into stream events, read on a spawned task.
fn ndjson_stream<S, B, E>(bytes: S) -> LLMStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(forward_frames(bytes, tx));
    Box::pin(ReceiverStream::new(rx))
}

async fn forward_frames<S, B, E>(bytes: S, tx: mpsc::Sender<Result<LLMStreamEvent>>)
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut bytes = Box::pin(bytes);
    let mut buffer = LineBuffer::default();

    while let Some(chunk) = bytes.next().await {
        match chunk {
            Ok(chunk) => buffer.extend(chunk.as_ref()),
            Err(e) => {
                let _ = tx
                    .send(Err(TutorError::UpstreamUnavailable(e.to_string())))
                    .await;
                return;
            }
        }
        while let Some(line) = buffer.next_line() {
            if !forward_line(line, &tx).await {
                return;
            }
        }
    }

    if let Some(line) = buffer.finish() {
        forward_line(line, &tx).await;
    }
}

/// Sends the events of one line. Returns false once reading should stop.
async fn forward_line(line: Result<String>, tx: &mpsc::Sender<Result<LLMStreamEvent>>) -> bool {
    let events = match line.and_then(|l| {
        if l.is_empty() {
            Ok(Vec::new())
        } else {
            parse_frame(&l)
        }
    }) {
        Ok(events) => events,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return false;
        }
    };
    for event in events {
        let done = event == LLMStreamEvent::Done;
        if tx.send(Ok(event)).await.is_err() {
            debug!("Stream receiver dropped, stopping generation read");
            return false;
        }
        if done {
            return false;
        }
    }
    true
}

/// An implementation of `GenerationClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn upstream(err: OpenAIError) -> TutorError {
    match err {
        OpenAIError::JSONDeserialize(e) => TutorError::UpstreamMalformed(e.to_string()),
        other => TutorError::UpstreamUnavailable(other.to_string()),
    }
}

#[async_trait]
impl GenerationClient for OpenAICompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(upstream)?
                    .into(),
            ])
            .build()
            .map_err(upstream)?;

        let response = self.client.chat().create(request).await.map_err(upstream)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TutorError::UpstreamMalformed("No content in LLM response".into()))
    }

    async fn stream(&self, prompt: &str) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(upstream)?
                    .into(),
            ])
            .stream(true)
            .build()
            .map_err(upstream)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(upstream)?;

        Ok(Box::pin(stream.flat_map(|result| {
            let events: Vec<Result<LLMStreamEvent>> = match result {
                Ok(response) => match response.choices.into_iter().next() {
                    Some(choice) => {
                        let mut events = Vec::new();
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(Ok(LLMStreamEvent::TextChunk(content)));
                        }
                        if choice.finish_reason.is_some() {
                            events.push(Ok(LLMStreamEvent::Done));
                        }
                        events
                    }
                    None => Vec::new(),
                },
                Err(e) => vec![Err(upstream(e))],
            };
            stream::iter(events)
        })))
    }
}


/// Test doubles shared by modules that call the generation service.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::time::Duration;

    /// A service that never answers within any timeout a test uses.
    pub(crate) struct StalledClient;

    #[async_trait]
    impl GenerationClient for StalledClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }

        async fn stream(&self, _prompt: &str) -> Result<LLMStream> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TutorError::UpstreamUnavailable("stalled".into()))
        }
    }
}
