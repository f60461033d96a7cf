//! HTTP backend: REST operations plus an SSE run stream

use crate::{
    backend::Backend,
    decision::FastReply,
    error::{Error, Result, is_benign_end_message},
    stream::{RunEvent, RunEventStream},
    types::{Message, MessageMeta, StartOptions},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Backend over a REST API with an SSE event stream per run
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct PersistMessageRequest<'a> {
    content: &'a str,
    metadata: &'a MessageMeta,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct AdaptiveInputRequest<'a> {
    thread_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct TitleRequest<'a> {
    first_user_prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartAgentResponse {
    agent_run_id: String,
}

/// Error envelope the API wraps failures in
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorDetail {
    code: String,
    message: String,
    current_usage: Option<f64>,
    limit: Option<f64>,
    running_count: Option<u32>,
    running_thread_ids: Option<Vec<String>>,
    current: Option<u64>,
    max: Option<u64>,
}

impl HttpBackend {
    /// Create a new backend against a base URL
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Create from `PARLEY_API_URL` / `PARLEY_API_KEY`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PARLEY_API_URL")
            .map_err(|_| Error::api("config", "PARLEY_API_URL is not set"))?;
        let api_key = std::env::var("PARLEY_API_KEY")
            .map_err(|_| Error::api("config", "PARLEY_API_KEY is not set"))?;
        Ok(Self::new(base_url, api_key))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(auth) = format!("Bearer {}", self.api_key).parse() {
            headers.insert("Authorization", auth);
        }
        headers.insert("accept", "application/json".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());
        headers
    }

    /// Turn a non-2xx response into a typed error
    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        let detail = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| ApiErrorDetail {
                code: status.as_str().to_string(),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text.clone()
                },
                ..Default::default()
            });

        match detail.code.as_str() {
            "billing_limit_exceeded" => Error::Billing {
                current_usage: detail.current_usage,
                limit: detail.limit,
                message: detail.message,
            },
            "concurrent_run_limit_exceeded" => Error::ConcurrentRunLimit {
                running_count: detail.running_count.unwrap_or(0),
                running_thread_ids: detail.running_thread_ids.unwrap_or_default(),
            },
            "project_limit_exceeded" => Error::ProjectLimit {
                current: detail.current.unwrap_or(0),
                limit: detail.max.or(detail.limit.map(|l| l as u64)).unwrap_or(0),
            },
            _ if is_benign_end_message(&detail.message) => Error::RunEnded(detail.message),
            _ => Error::Api {
                code: detail.code,
                message: detail.message,
            },
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let response = self
            .client
            .post(self.url(path))
            .headers(self.headers())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn post_no_body<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.post(path, &serde_json::json!({})).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn persist_user_message(
        &self,
        thread_id: &str,
        content: &str,
        meta: MessageMeta,
    ) -> Result<Message> {
        self.post(
            &format!("/threads/{}/messages/user", thread_id),
            &PersistMessageRequest {
                content,
                metadata: &meta,
            },
        )
        .await
    }

    async fn persist_assistant_message(
        &self,
        thread_id: &str,
        content: &str,
        meta: MessageMeta,
    ) -> Result<Message> {
        self.post(
            &format!("/threads/{}/messages/assistant", thread_id),
            &PersistMessageRequest {
                content,
                metadata: &meta,
            },
        )
        .await
    }

    async fn start_agent(&self, thread_id: &str, options: &StartOptions) -> Result<String> {
        let response: StartAgentResponse = self
            .post(&format!("/threads/{}/agent/start", thread_id), options)
            .await?;
        Ok(response.agent_run_id)
    }

    async fn stop_agent(&self, agent_run_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_no_body(&format!("/agent-runs/{}/stop", agent_run_id))
            .await?;
        Ok(())
    }

    async fn send_adaptive_input(
        &self,
        agent_run_id: &str,
        thread_id: &str,
        message: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                &format!("/agent-runs/{}/input", agent_run_id),
                &AdaptiveInputRequest { thread_id, message },
            )
            .await?;
        Ok(())
    }

    async fn open_run_stream(&self, agent_run_id: &str) -> Result<RunEventStream> {
        let request_builder = self
            .client
            .get(self.url(&format!("/agent-runs/{}/stream", agent_run_id)))
            .headers(self.headers());

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(sse_run_events(event_source)))
    }

    async fn fast_chat(&self, message: &str) -> Result<FastReply> {
        self.post("/chat/fast", &ChatRequest { message }).await
    }

    async fn adaptive_chat(&self, message: &str) -> Result<FastReply> {
        self.post("/chat/adaptive", &ChatRequest { message }).await
    }

    async fn trigger_title_generation(
        &self,
        project_id: &str,
        first_user_prompt: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                &format!("/projects/{}/title", project_id),
                &TitleRequest { first_user_prompt },
            )
            .await?;
        Ok(())
    }
}

/// Decode SSE frames into run events. Each SSE `data:` payload is a
/// JSON-encoded [`RunEvent`]. The stream always ends with a `Close`
/// frame even when the transport drops.
fn sse_run_events(mut event_source: EventSource) -> impl futures::Stream<Item = RunEvent> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    match serde_json::from_str::<RunEvent>(&message.data) {
                        Ok(RunEvent::Close) => break,
                        Ok(run_event) => {
                            let terminal = run_event.is_terminal();
                            yield run_event;
                            if terminal {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Skipping undecodable SSE frame: {}", e);
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield RunEvent::Error { message: e.to_string() };
                    break;
                }
            }
        }
        event_source.close();
        yield RunEvent::Close;
    }
}
