//! # Trigger Adapters
//!
//! JSON entry points for the two external triggers: "split this dataset" and
//! "this job is complete". Each returns a status code and a JSON body; input
//! shape problems are 400, everything else that goes wrong is 500.
//!
//! Payloads may arrive bare or wrapped as `{"body": "<json text>"}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::completion::{CompletionError, CompletionHandler, CompletionNotice};
use super::splitter::{JobSplitter, SourceLocation};
use crate::messaging::MessagingService;
use crate::models::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl TriggerResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 400,
            body: json!({ "error": message.to_string() }),
        }
    }

    pub fn internal_error(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Unwrap `{"body": "<json>"}` envelopes.
fn unwrap_payload(payload: &Value) -> Result<Value, TriggerResponse> {
    match payload.get("body") {
        Some(Value::String(text)) => serde_json::from_str(text)
            .map_err(|e| TriggerResponse::bad_request(format!("body is not valid JSON: {e}"))),
        _ => Ok(payload.clone()),
    }
}

fn non_empty_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub async fn handle_split_trigger<M: MessagingService>(
    splitter: &JobSplitter<M>,
    payload: &Value,
) -> TriggerResponse {
    let payload = match unwrap_payload(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let (Some(bucket), Some(key)) = (
        non_empty_str(&payload, "bucket"),
        non_empty_str(&payload, "key"),
    ) else {
        return TriggerResponse::bad_request("Missing 'bucket' or 'key' in request body");
    };

    info!(bucket = %bucket, key = %key, "📥 Split requested");
    match splitter.split(&SourceLocation::new(bucket, key)).await {
        Ok(report) => TriggerResponse::ok(json!({
            "message": format!("Job {} started.", report.job_id),
            "job_id": report.job_id,
            "chunks": report.chunks,
            "file": report.file,
            "relocated_to": report.relocated_to,
        })),
        Err(err) if err.is_client_error() => TriggerResponse::bad_request(err),
        Err(err) => {
            error!(bucket = %bucket, key = %key, error = %err, "❌ Split failed");
            TriggerResponse::internal_error(err)
        }
    }
}

pub async fn handle_completion_trigger(handler: &CompletionHandler, payload: &Value) -> TriggerResponse {
    let payload = match unwrap_payload(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let notice = match parse_notice(&payload) {
        Ok(notice) => notice,
        Err(err) => return TriggerResponse::bad_request(err),
    };

    info!(job_id = %notice.job_id, status = %notice.status, "📥 Completion signal received");
    match handler.handle(&notice).await {
        Ok(report) => TriggerResponse::ok(json!({
            "message": "Cleanup Successful",
            "job_id": report.job_id,
            "artifacts_deleted": report.artifacts_deleted,
            "source_removed": report.source_removed,
        })),
        Err(err @ CompletionError::NotCompleted { .. }) => {
            TriggerResponse::bad_request(format!("Invalid Request or Job not complete: {err}"))
        }
        Err(err) => TriggerResponse::bad_request(err),
    }
}

fn parse_notice(payload: &Value) -> Result<CompletionNotice, CompletionError> {
    let job_id = non_empty_str(payload, "job_id")
        .ok_or_else(|| CompletionError::invalid_request("missing 'job_id'"))?;
    let job_id: JobId = job_id
        .parse()
        .map_err(|e| CompletionError::invalid_request(format!("invalid job_id '{job_id}': {e}")))?;
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let source_key = non_empty_str(payload, "source_key").map(str::to_string);

    Ok(CompletionNotice {
        job_id,
        status,
        source_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, StorageConfig};
    use crate::messaging::InMemoryMessagingService;
    use crate::progress::{InMemoryCounterStore, ProgressTracker};
    use crate::storage::{InMemoryObjectStore, ObjectStore};
    use std::sync::Arc;

    async fn splitter(store: Arc<InMemoryObjectStore>) -> JobSplitter<InMemoryMessagingService> {
        let config = PipelineConfig::default();
        let messaging = Arc::new(InMemoryMessagingService::new());
        messaging.ensure_queue(&config.splitter.chunk_queue).await.unwrap();
        let tracker = ProgressTracker::new(Arc::new(InMemoryCounterStore::new()), config.progress.ttl());
        JobSplitter::new(store, messaging, tracker, &config)
    }

    #[tokio::test]
    async fn test_split_trigger_success_body() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .put("sources", "market.csv", b"Ticker\nAAPL\nMSFT\n".to_vec())
            .await
            .unwrap();

        let response = handle_split_trigger(
            &splitter(store).await,
            &json!({"bucket": "sources", "key": "market.csv"}),
        )
        .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["chunks"], 1);
        assert_eq!(response.body["file"], "market.csv");
        let job_id = response.body["job_id"].as_str().unwrap();
        assert_eq!(response.body["message"], format!("Job {job_id} started."));
    }

    #[tokio::test]
    async fn test_split_trigger_shape_errors_are_400() {
        let splitter = splitter(Arc::new(InMemoryObjectStore::new())).await;

        for payload in [
            json!({"bucket": "sources"}),
            json!({"key": "market.csv"}),
            json!({"bucket": "", "key": "market.csv"}),
            json!({"body": "{not json"}),
        ] {
            let response = handle_split_trigger(&splitter, &payload).await;
            assert_eq!(response.status_code, 400, "payload {payload}");
            assert!(response.body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_split_trigger_missing_source_is_500() {
        let splitter = splitter(Arc::new(InMemoryObjectStore::new())).await;
        let response = handle_split_trigger(
            &splitter,
            &json!({"body": "{\"bucket\": \"sources\", \"key\": \"absent.csv\"}"}),
        )
        .await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_completion_trigger_validation() {
        let handler = CompletionHandler::new(Arc::new(InMemoryObjectStore::new()), &StorageConfig::default());
        let job_id = JobId::new().to_string();

        let cases = [
            (json!({"status": "COMPLETED"}), 400),
            (json!({"job_id": "not-a-uuid", "status": "COMPLETED"}), 400),
            (json!({"job_id": job_id, "status": "RUNNING"}), 400),
            (json!({"job_id": job_id}), 400),
            (json!({"job_id": job_id, "status": "COMPLETED"}), 200),
        ];
        for (payload, expected) in cases {
            let response = handle_completion_trigger(&handler, &payload).await;
            assert_eq!(response.status_code, expected, "payload {payload}");
        }
    }

    #[tokio::test]
    async fn test_completion_trigger_success_body() {
        let handler = CompletionHandler::new(Arc::new(InMemoryObjectStore::new()), &StorageConfig::default());
        let job_id = JobId::new();

        let response = handle_completion_trigger(
            &handler,
            &json!({"job_id": job_id.to_string(), "status": "COMPLETED"}),
        )
        .await;

        assert!(response.is_success());
        assert_eq!(response.body["message"], "Cleanup Successful");
        assert_eq!(response.body["job_id"], job_id.to_string());
        assert_eq!(response.body["artifacts_deleted"], 0);
    }
}
