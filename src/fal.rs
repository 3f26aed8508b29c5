use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::FalSettings;
use crate::jobs::normalize::error_message;
use crate::jobs::{JobArguments, JobHandle, JobStatus, RemoteError, RemoteJobClient, StatusReport};

pub const FAL_RUN_URL: &str = "https://fal.run";
pub const FAL_QUEUE_URL: &str = "https://queue.fal.run";

const MAX_ERROR_TEXT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Call,
    Fetch,
}

#[derive(Debug, Deserialize)]
struct QueueSubmitResponse {
    request_id: Option<String>,
    status_url: Option<String>,
    response_url: Option<String>,
    cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueStatusResponse {
    status: Option<String>,
    queue_position: Option<u64>,
    logs: Option<Vec<QueueLog>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueueLog {
    message: Option<String>,
}

/// fal.ai client covering the synchronous and queue REST APIs.
#[derive(Clone, Debug)]
pub struct FalClient {
    http: Client,
    api_key: Option<String>,
    run_base_url: String,
    queue_base_url: String,
}

impl FalClient {
    pub fn new(settings: &FalSettings) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(settings.http_timeout).build()?;
        Ok(Self {
            http,
            api_key: settings
                .api_key
                .clone()
                .filter(|value| !value.trim().is_empty()),
            run_base_url: settings.run_base_url.trim_end_matches('/').to_string(),
            queue_base_url: settings.queue_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::Auth("FAL_KEY is not set".to_string()))?;
        Ok(request.header(AUTHORIZATION, format!("Key {api_key}")))
    }

    async fn send(&self, request: RequestBuilder, phase: Phase) -> Result<Response, RemoteError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(transport_error)?;
        assert_ok_response(response, phase).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        phase: Phase,
    ) -> Result<T, RemoteError> {
        let response = self.send(request, phase).await?;
        response.json::<T>().await.map_err(transport_error)
    }

    /// Queue URLs are keyed by app id, i.e. the first two path segments.
    fn queue_request_url(&self, endpoint: &str, request_id: &str) -> String {
        let app_id = endpoint
            .trim_matches('/')
            .split('/')
            .take(2)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{app_id}/requests/{request_id}", self.queue_base_url)
    }
}

#[async_trait]
impl RemoteJobClient for FalClient {
    async fn run(&self, endpoint: &str, arguments: &JobArguments) -> Result<Value, RemoteError> {
        let url = join_endpoint(&self.run_base_url, endpoint);
        debug!(%url, "fal run");
        self.send_json(self.http.post(url).json(arguments), Phase::Call)
            .await
    }

    async fn submit(
        &self,
        endpoint: &str,
        arguments: &JobArguments,
    ) -> Result<JobHandle, RemoteError> {
        let url = join_endpoint(&self.queue_base_url, endpoint);
        debug!(%url, "fal queue submit");
        let payload: QueueSubmitResponse = self
            .send_json(self.http.post(url).json(arguments), Phase::Call)
            .await?;
        let request_id = payload.request_id.ok_or_else(|| RemoteError::Provider {
            status: None,
            message: "queue did not return a request_id".to_string(),
        })?;

        let base = self.queue_request_url(endpoint, &request_id);
        Ok(JobHandle {
            endpoint: endpoint.to_string(),
            status_url: payload
                .status_url
                .unwrap_or_else(|| format!("{base}/status")),
            response_url: payload.response_url.unwrap_or_else(|| base.clone()),
            cancel_url: Some(payload.cancel_url.unwrap_or_else(|| format!("{base}/cancel"))),
            request_id,
        })
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<StatusReport, RemoteError> {
        let request = self.http.get(&handle.status_url).query(&[("logs", "1")]);
        let payload: QueueStatusResponse = self.send_json(request, Phase::Call).await?;
        let label = payload.status.ok_or_else(|| RemoteError::Provider {
            status: None,
            message: "queue status response has no status".to_string(),
        })?;

        let error = payload.error.and_then(|value| match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(error_message(&other).unwrap_or_else(|| other.to_string())),
        });
        let logs = payload
            .logs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|log| log.message)
            .collect();

        Ok(StatusReport {
            status: status_from_label(&label, error.is_some()),
            label,
            logs,
            queue_position: payload.queue_position,
            error,
        })
    }

    async fn fetch_result(&self, handle: &JobHandle) -> Result<Value, RemoteError> {
        self.send_json(self.http.get(&handle.response_url), Phase::Fetch)
            .await
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), RemoteError> {
        let Some(cancel_url) = handle.cancel_url.as_deref() else {
            return Err(RemoteError::Unsupported("cancel"));
        };
        self.send(self.http.put(cancel_url), Phase::Call).await?;
        Ok(())
    }
}

fn join_endpoint(base: &str, endpoint: &str) -> String {
    format!("{base}/{}", endpoint.trim_matches('/'))
}

fn status_from_label(label: &str, has_error: bool) -> JobStatus {
    match label.trim().to_ascii_uppercase().as_str() {
        "COMPLETED" | "SUCCEEDED" | "SUCCESS" if has_error => JobStatus::Failed,
        "COMPLETED" | "SUCCEEDED" | "SUCCESS" => JobStatus::Succeeded,
        "FAILED" | "ERROR" => JobStatus::Failed,
        "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
        "IN_QUEUE" | "QUEUED" => JobStatus::Queued,
        _ => JobStatus::InProgress,
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        return RemoteError::Provider {
            status: None,
            message: format!("unreadable response: {err}"),
        };
    }
    RemoteError::Network(err.to_string())
}

async fn assert_ok_response(response: Response, phase: Phase) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let text = response.text().await.unwrap_or_default();
    let message = describe_error_body(&text)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no details").to_string());

    Err(match status.as_u16() {
        401 | 403 => RemoteError::Auth(message),
        429 => RemoteError::RateLimited {
            message,
            retry_after,
        },
        404 | 410 if phase == Phase::Fetch => RemoteError::ResultExpired(message),
        400 | 404 | 422 => RemoteError::InvalidArgument(message),
        code => RemoteError::Provider {
            status: Some(code),
            message,
        },
    })
}

fn describe_error_body(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let Some(message) = error_message(&value)
    {
        return Some(message);
    }
    Some(trimmed.chars().take(MAX_ERROR_TEXT).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> FalClient {
        FalClient::new(&FalSettings {
            api_key: api_key.map(str::to_string),
            run_base_url: format!("{}/run", server.uri()),
            queue_base_url: format!("{}/queue", server.uri()),
            http_timeout: Duration::from_secs(5),
        })
        .expect("build client")
    }

    fn prompt() -> JobArguments {
        json!({"prompt": "a red fox"})
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn run_posts_arguments_with_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run/fal-ai/flux/schnell"))
            .and(header("authorization", "Key test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": [{"url": "https://cdn.example/fox.png"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server, Some("test-key"))
            .run("fal-ai/flux/schnell", &prompt())
            .await
            .expect("run");
        assert_eq!(result["images"][0]["url"], "https://cdn.example/fox.png");
    }

    #[tokio::test]
    async fn missing_key_fails_without_traffic() {
        let server = MockServer::start().await;
        let err = client_for(&server, None)
            .run("fal-ai/flux/schnell", &prompt())
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::Auth(_)));
        let received = server.received_requests().await.unwrap_or_default();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn http_errors_map_to_remote_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/run/unauthorized"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid key"})))
            .mount(&server)
            .await;
        Mock::given(path("/run/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;
        Mock::given(path("/run/bad"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "detail": [{"loc": ["body", "prompt"], "msg": "field required"}]
            })))
            .mount(&server)
            .await;
        Mock::given(path("/run/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));

        let err = client.run("unauthorized", &prompt()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Auth(ref message) if message == "Invalid key"));

        let err = client.run("busy", &prompt()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = client.run("bad", &prompt()).await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidArgument(ref message) if message == "field required"));

        let err = client.run("broken", &prompt()).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Provider { status: Some(500), ref message } if message == "upstream exploded"
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn queue_round_trip_uses_returned_urls() {
        let server = MockServer::start().await;
        let base = format!("{}/queue/fal-ai/wan-i2v/requests/req-42", server.uri());
        Mock::given(method("POST"))
            .and(path("/queue/fal-ai/wan-i2v"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "req-42",
                "status_url": format!("{base}/status"),
                "response_url": base,
                "cancel_url": format!("{base}/cancel"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue/fal-ai/wan-i2v/requests/req-42/status"))
            .and(query_param("logs", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "IN_QUEUE",
                "queue_position": 3,
                "logs": [{"message": "waiting for worker", "level": "INFO"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queue/fal-ai/wan-i2v/requests/req-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "video": {"url": "https://cdn.example/clip.mp4"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/queue/fal-ai/wan-i2v/requests/req-42/cancel"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));
        let handle = client.submit("fal-ai/wan-i2v", &prompt()).await.expect("submit");
        assert_eq!(handle.request_id, "req-42");

        let report = client.poll_status(&handle).await.expect("poll");
        assert_eq!(report.status, JobStatus::Queued);
        assert_eq!(report.label, "IN_QUEUE");
        assert_eq!(report.queue_position, Some(3));
        assert_eq!(report.logs, vec!["waiting for worker"]);

        let result = client.fetch_result(&handle).await.expect("fetch");
        assert_eq!(result["video"]["url"], "https://cdn.example/clip.mp4");

        client.cancel(&handle).await.expect("cancel");
    }

    #[tokio::test]
    async fn submit_derives_urls_from_app_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/fal-ai/kling-video/v2/master/text-to-video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "abc"})))
            .mount(&server)
            .await;

        let handle = client_for(&server, Some("test-key"))
            .submit("fal-ai/kling-video/v2/master/text-to-video", &prompt())
            .await
            .expect("submit");
        let base = format!("{}/queue/fal-ai/kling-video/requests/abc", server.uri());
        assert_eq!(handle.status_url, format!("{base}/status"));
        assert_eq!(handle.response_url, base);
        assert_eq!(handle.cancel_url, Some(format!("{base}/cancel")));
    }

    #[tokio::test]
    async fn completed_with_error_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/fal-ai/lyria2/requests/r1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "COMPLETED",
                "error": "Internal worker error",
                "logs": [{"message": "step 1/30"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));
        let handle = JobHandle {
            request_id: "r1".into(),
            endpoint: "fal-ai/lyria2".into(),
            status_url: format!("{}/queue/fal-ai/lyria2/requests/r1/status", server.uri()),
            response_url: format!("{}/queue/fal-ai/lyria2/requests/r1", server.uri()),
            cancel_url: None,
        };
        let report = client.poll_status(&handle).await.expect("poll");
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("Internal worker error"));

        let err = client.cancel(&handle).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unsupported(_)));
    }

    #[tokio::test]
    async fn missing_result_is_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/fal-ai/lyria2/requests/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Request not found"})))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));
        let handle = JobHandle {
            request_id: "gone".into(),
            endpoint: "fal-ai/lyria2".into(),
            status_url: format!("{}/queue/fal-ai/lyria2/requests/gone/status", server.uri()),
            response_url: format!("{}/queue/fal-ai/lyria2/requests/gone", server.uri()),
            cancel_url: None,
        };
        let err = client.fetch_result(&handle).await.unwrap_err();
        assert!(matches!(err, RemoteError::ResultExpired(ref message) if message == "Request not found"));
    }

    #[test]
    fn status_labels() {
        assert_eq!(status_from_label("IN_PROGRESS", false), JobStatus::InProgress);
        assert_eq!(status_from_label("completed", false), JobStatus::Succeeded);
        assert_eq!(status_from_label("CANCELED", false), JobStatus::Cancelled);
        assert_eq!(status_from_label("WARMING_UP", false), JobStatus::InProgress);
    }
}
