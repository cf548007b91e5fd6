use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::{single_fragment, Backend, BackendRequest, DeltaStream};
use crate::errors::{GatewayError, GatewayResult};

pub const CLOUD_HOST: &str = "https://api.openai.com";

/// Env var the API credential is expected in.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Default deadline for the non-streamed stored-prompt call. Streaming calls
/// get no overall read deadline.
const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter for the cloud chat-completion / stored-prompt API.
///
/// Agents bound to a stored prompt issue one non-streamed call and yield the
/// whole reply as a single fragment; everything else goes through the
/// streamed chat-completion endpoint (SSE `data:` lines).
pub struct CloudBackend {
    client: Client,
    host: String,
    api_key: Option<String>,
    one_shot_timeout: Duration,
}

/// What one SSE line contributed to the stream.
enum SseLine {
    Delta(String),
    Done,
    Noise,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, blank keep-alives, anything else: not a payload.
        return SseLine::Noise;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(obj) => {
            let delta = obj["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap_or("")
                .to_string();
            SseLine::Delta(delta)
        }
        Err(_) => SseLine::Noise,
    }
}

impl CloudBackend {
    pub fn new<S: Into<String>>(host: S, api_key: Option<String>) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Backend(format!("http client: {e}")))?;

        Ok(Self {
            client,
            host: host.into(),
            api_key,
            one_shot_timeout: ONE_SHOT_TIMEOUT,
        })
    }

    /// Override the stored-prompt deadline.
    pub fn with_one_shot_timeout(mut self, timeout: Duration) -> Self {
        self.one_shot_timeout = timeout;
        self
    }

    fn api_key(&self) -> GatewayResult<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingCredential(API_KEY_VAR))
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), endpoint)
    }

    async fn error_for(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        GatewayError::Backend(format!("{status}: {detail}"))
    }

    /// One non-streamed call bound to a server-side stored prompt.
    async fn stored_prompt(
        &self,
        prompt: &crate::agents::FixedPrompt,
        input: &str,
    ) -> GatewayResult<String> {
        let key = self.api_key()?;
        let payload = json!({
            "prompt": { "id": prompt.id, "version": prompt.version },
            "input": input,
        });

        let send = self
            .client
            .post(self.url("/v1/responses"))
            .bearer_auth(key)
            .json(&payload)
            .send();

        let response = tokio::time::timeout(self.one_shot_timeout, send)
            .await
            .map_err(|_| GatewayError::BackendTimeout(self.one_shot_timeout))?
            .map_err(|e| GatewayError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        Ok(body["output_text"].as_str().unwrap_or("").to_string())
    }

    /// Streamed chat-completion call; yields each incremental content delta.
    async fn chat_completions(&self, request: &BackendRequest) -> GatewayResult<DeltaStream> {
        let key = self.api_key()?;
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let mut body = response.bytes_stream();
        let stream = try_stream! {
            let mut buf = String::new();
            'read: while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| GatewayError::Backend(e.to_string()))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    match parse_sse_line(&line) {
                        SseLine::Delta(delta) => {
                            if !delta.is_empty() {
                                yield delta;
                            }
                        }
                        SseLine::Done => break 'read,
                        SseLine::Noise => continue,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Backend for CloudBackend {
    async fn stream_chat(&self, request: BackendRequest) -> GatewayResult<DeltaStream> {
        match &request.fixed_prompt {
            Some(prompt) => {
                let text = self.stored_prompt(prompt, &request.input).await?;
                Ok(single_fragment(text))
            }
            None => self.chat_completions(&request).await,
        }
    }
}
