use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::{Backend, BackendRequest, DeltaStream};
use crate::errors::{GatewayError, GatewayResult};

pub const LOCAL_HOST: &str = "http://localhost:11434";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Adapter for a local chat-completion daemon speaking line-delimited JSON.
///
/// Each response line carries an incremental `message.content` string and a
/// `done` flag; anything that is not parseable JSON is treated as transport
/// keep-alive noise and skipped.
pub struct LocalBackend {
    client: Client,
    host: String,
}

/// What one upstream line contributed to the stream.
enum Line {
    Fragment { content: String, done: bool },
    Noise,
}

fn parse_line(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty() {
        return Line::Noise;
    }
    // Some daemon builds frame the same objects as SSE data lines.
    let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    match serde_json::from_str::<Value>(line) {
        Ok(obj) => Line::Fragment {
            content: obj["message"]["content"].as_str().unwrap_or("").to_string(),
            done: obj["done"].as_bool().unwrap_or(false),
        },
        Err(_) => Line::Noise,
    }
}

impl LocalBackend {
    pub fn new<S: Into<String>>(host: S) -> GatewayResult<Self> {
        // Streaming reads stay open as long as the model generates, so only
        // the connect phase gets a deadline.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Backend(format!("http client: {e}")))?;

        Ok(Self {
            client,
            host: host.into(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host.trim_end_matches('/'))
    }

    /// Liveness probe against the daemon's tags endpoint.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.host.trim_end_matches('/'));
        let probe = self.client.get(&url).send();
        matches!(
            tokio::time::timeout(Duration::from_secs(2), probe).await,
            Ok(Ok(resp)) if resp.status().is_success()
        )
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn stream_chat(&self, request: BackendRequest) -> GatewayResult<DeltaStream> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        let response = self
            .client
            .post(self.chat_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::BackendTimeout(CONNECT_TIMEOUT)
                } else {
                    GatewayError::BackendUnreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::BackendUnreachable(format!(
                "local backend returned {status}"
            )));
        }

        let mut body = response.bytes_stream();
        let stream = try_stream! {
            let mut buf = String::new();
            'read: while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| GatewayError::Backend(e.to_string()))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    match parse_line(&line) {
                        Line::Fragment { content, done } => {
                            if !content.is_empty() {
                                yield content;
                            }
                            if done {
                                break 'read;
                            }
                        }
                        Line::Noise => continue,
                    }
                }
            }

            // A final object may arrive without a trailing newline.
            if let Line::Fragment { content, .. } = parse_line(&buf) {
                if !content.is_empty() {
                    yield content;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Message;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> BackendRequest {
        BackendRequest {
            model: "llama3:8b-instruct-q4_K_M".to_string(),
            messages: vec![Message::user("hello")],
            fixed_prompt: None,
            input: "hello".to_string(),
        }
    }

    async fn collect(backend: &LocalBackend) -> Vec<String> {
        let mut stream = backend.stream_chat(request()).await.unwrap();
        let mut out = Vec::new();
        while let Some(delta) = stream.next().await {
            out.push(delta.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri()).unwrap();
        assert_eq!(collect(&backend).await, vec!["Hi", " there"]);
    }

    #[tokio::test]
    async fn test_stream_stops_at_done_marker() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"content\":\"early\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"late\"},\"done\":false}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri()).unwrap();
        assert_eq!(collect(&backend).await, vec!["early"]);
    }

    #[tokio::test]
    async fn test_noise_lines_are_skipped() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n",
            "not json at all\n",
            "data: {\"message\":{\"content\":\"ok\"},\"done\":false}\n",
            "\n",
            "{\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri()).unwrap();
        assert_eq!(collect(&backend).await, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_non_success_status_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri()).unwrap();
        let err = backend.stream_chat(request()).await.err().unwrap();
        assert!(matches!(err, GatewayError::BackendUnreachable(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Nothing listens on this port.
        let backend = LocalBackend::new("http://127.0.0.1:1").unwrap();
        let err = backend.stream_chat(request()).await.err().unwrap();
        assert!(matches!(err, GatewayError::BackendUnreachable(_)));
    }

    #[tokio::test]
    async fn test_ping_reports_liveness() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(LocalBackend::new(server.uri()).unwrap().ping().await);
        assert!(!LocalBackend::new("http://127.0.0.1:1").unwrap().ping().await);
    }

    #[test]
    fn test_parse_line_variants() {
        assert!(matches!(parse_line(""), Line::Noise));
        assert!(matches!(parse_line("garbage"), Line::Noise));
        match parse_line("data: {\"message\":{\"content\":\"x\"},\"done\":false}") {
            Line::Fragment { content, done } => {
                assert_eq!(content, "x");
                assert!(!done);
            }
            Line::Noise => panic!("expected fragment"),
        }
        match parse_line("{\"done\":true}") {
            Line::Fragment { content, done } => {
                assert!(content.is_empty());
                assert!(done);
            }
            Line::Noise => panic!("expected fragment"),
        }
    }
}
