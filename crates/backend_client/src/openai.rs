//! API-key backed chat-completions backend.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use log::{debug, error, info};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::backend::{EventStream, LlmBackend, StreamEvent};
use crate::error::{BackendError, Result};
use crate::models::{ChatCompletionRequest, ChatCompletionStreamChunk};
use relay_core::PromptMessage;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiBackend {
    id: String,
    client: ClientWithMiddleware,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(
        id: impl Into<String>,
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client: Self::build_retry_client(),
            api_key: api_key.into(),
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: model.into(),
        }
    }

    fn build_retry_client() -> ClientWithMiddleware {
        // Exponential backoff between 1s and 8s, three attempts
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(8))
            .build_with_max_retries(3);

        ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, prompt: &[PromptMessage]) -> Result<EventStream> {
        let request = ChatCompletionRequest::streaming(&self.model, prompt);
        let url = format!("{}/chat/completions", self.api_base);
        debug!(
            "submitting {} prompt messages to {} via {}",
            prompt.len(),
            self.model,
            self.id
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("failed to send chat completion request: {e}");
                BackendError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let mut events = response.bytes_stream().eventsource();
        let stream = try_stream! {
            let mut finished = false;
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| {
                    error!("error in SSE stream: {e}");
                    BackendError::Unavailable(e.to_string())
                })?;
                if event.data == DONE_SENTINEL {
                    info!("received [DONE] signal, closing stream");
                    finished = true;
                    break;
                }
                let chunk: ChatCompletionStreamChunk = serde_json::from_str(&event.data)
                    .map_err(|e| {
                        error!("failed to parse stream chunk: {e}, data: {}", event.data);
                        BackendError::Malformed(e.to_string())
                    })?;
                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        yield StreamEvent::Delta(Bytes::from(content));
                    }
                }
            }
            // A transport that ends without the sentinel is treated as
            // complete rather than hanging the caller.
            if !finished {
                debug!("stream ended without [DONE] sentinel");
            }
            yield StreamEvent::Done;
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(parts: &[&str]) -> String {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!(
                "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{part}\"}}}}]}}\n\n"
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn drain(mut stream: EventStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn streams_deltas_then_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&["Hello", " world"]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("bot-0", "sk-test", Some(server.uri()), "test-model");
        let stream = backend
            .submit(&[PromptMessage::user("hi")])
            .await
            .unwrap();

        let events = drain(stream).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta(Bytes::from("Hello")),
                StreamEvent::Delta(Bytes::from(" world")),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn client_error_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("bot-0", "sk-test", Some(server.uri()), "test-model");
        let err = backend
            .submit(&[PromptMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            BackendError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            BackendError::RateLimited
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::BAD_REQUEST, String::new()),
            BackendError::Malformed(_)
        ));
    }
}
