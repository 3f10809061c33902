//! HTTP binding of the coordinator port.
//!
//! Every call is signed: the path (relative to the coordinator base URL) is
//! signed with the worker secret and the signature triple is appended as
//! query parameters.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use super::signature::RequestSigner;
use crate::domain::errors::CoordinatorError;
use crate::domain::models::{
    ControlMessage, GroupAssignment, GroupReport, RequestError, RequestRecord,
};
use crate::domain::ports::{
    CoordinatorClient, NextWork, RequestStream, WorkRequest, WorkResponse,
};

/// Maximum accepted length of one streamed request record line.
const MAX_RECORD_LINE: usize = 16 * 1024 * 1024;

/// Coordinator client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCoordinatorClient {
    http_client: ReqwestClient,
    base_url: String,
    worker_id: String,
    signer: RequestSigner,
}

impl HttpCoordinatorClient {
    /// Create a client for `base_url` acting as `worker_id`.
    pub fn new(
        base_url: &str,
        worker_id: impl Into<String>,
        signer: RequestSigner,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.into(),
            signer,
        })
    }

    fn worker_path(&self) -> String {
        format!("/worker/workers/{}", self.worker_id)
    }

    fn group_path(&self, assignment: &GroupAssignment) -> String {
        format!(
            "{}/jobs/{}/groups/{}",
            self.worker_path(),
            assignment.batch_job_id,
            assignment.group_id
        )
    }

    /// Absolute URL for `path` with the signature appended.
    fn signed_url(&self, path: &str, extra: &[(&str, String)]) -> Result<reqwest::Url, CoordinatorError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| CoordinatorError::Decode(format!("invalid URL for {path}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
            for (key, value) in self.signer.sign(path).query_pairs() {
                query.append_pair(key, &value);
            }
        }
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response, CoordinatorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().path().to_string();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CoordinatorError::NotFound(url));
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(CoordinatorError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json_body(response: Response) -> Result<Value, CoordinatorError> {
        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(&bytes).map_err(|e| CoordinatorError::Decode(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> CoordinatorError {
    if err.is_timeout() {
        CoordinatorError::Timeout
    } else if err.is_decode() {
        CoordinatorError::Decode(err.to_string())
    } else {
        CoordinatorError::Transport(err.to_string())
    }
}

/// Parse a "next work" response body.
///
/// The body is an object that may carry a group assignment (`batchJobId`
/// present), a module load instruction (`action` of `loadModule` or
/// `moduleStart`), and a `messages` map of numbered control messages.
pub fn parse_work_response(body: Value) -> Result<WorkResponse, CoordinatorError> {
    let Value::Object(mut body) = body else {
        return Err(CoordinatorError::Decode("next work response is not an object".into()));
    };

    let mut messages = Vec::new();
    if let Some(Value::Object(numbered)) = body.remove("messages") {
        for (id, message) in numbered {
            let Ok(id) = id.parse::<i64>() else {
                warn!(message_id = %id, "ignoring control message with non-numeric id");
                continue;
            };
            match parse_control_message(message) {
                Ok(message) => messages.push((id, message)),
                Err(e) => warn!(message_id = id, error = %e, "ignoring unparsable control message"),
            }
        }
        messages.sort_by_key(|(id, _)| *id);
    }

    let action = body.get("action").and_then(Value::as_str).unwrap_or_default();
    let work = if action == "loadModule" || action == "moduleStart" {
        let module_name = body
            .get("moduleName")
            .and_then(Value::as_str)
            .ok_or_else(|| CoordinatorError::Decode("module instruction without moduleName".into()))?
            .to_string();
        let module_time = body
            .get("moduleTime")
            .and_then(Value::as_i64)
            .ok_or_else(|| CoordinatorError::Decode("module instruction without moduleTime".into()))?;
        let bundle_count = body
            .get("bundleCount")
            .or_else(|| body.get("moduleJarCount"))
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or_default();
        NextWork::ModuleStart {
            module_name,
            module_time,
            bundle_count,
        }
    } else if body.contains_key("batchJobId") {
        let assignment: GroupAssignment = serde_json::from_value(Value::Object(body))
            .map_err(|e| CoordinatorError::Decode(format!("invalid group assignment: {e}")))?;
        NextWork::Group(assignment)
    } else {
        NextWork::NoWork
    };

    Ok(WorkResponse { work, messages })
}

/// Parse a control message, accepting the legacy `action` tag.
pub fn parse_control_message(mut value: Value) -> Result<ControlMessage, serde_json::Error> {
    if let Value::Object(ref mut map) = value {
        if !map.contains_key("type") {
            if let Some(action) = map.remove("action") {
                map.insert("type".to_string(), action);
            }
        }
    }
    serde_json::from_value(value)
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn next_work(&self, request: &WorkRequest) -> Result<WorkResponse, CoordinatorError> {
        let path = format!("{}/jobs/groups/nextId", self.worker_path());
        let mut params = vec![
            ("workerStartTime", request.worker_start_time.to_string()),
            ("maxMessageId", request.max_message_id.to_string()),
        ];
        params.extend(
            request
                .module_names
                .iter()
                .map(|name| ("moduleName", name.clone())),
        );
        let url = self.signed_url(&path, &params)?;
        debug!(path = %path, max_message_id = request.max_message_id, "requesting next work");

        let response = self.http_client.post(url).send().await.map_err(transport_error)?;
        let body = Self::json_body(Self::check(response).await?).await?;
        parse_work_response(body)
    }

    async fn group_requests(
        &self,
        assignment: &GroupAssignment,
    ) -> Result<RequestStream, CoordinatorError> {
        let url = self.signed_url(&self.group_path(assignment), &[])?;
        let response = self.http_client.get(url).send().await.map_err(transport_error)?;
        let response = Self::check(response).await?;

        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        let lines = FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_RECORD_LINE),
        );

        let records = lines
            .filter_map(|line| async move {
                match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(parse_request_line(&line)),
                    Err(e) => Some(Err(CoordinatorError::Transport(e.to_string()))),
                }
            })
            .boxed();
        Ok(records)
    }

    async fn submit_results(
        &self,
        assignment: &GroupAssignment,
        report: &GroupReport,
        results: tokio::fs::File,
    ) -> Result<(), CoordinatorError> {
        let path = format!("{}/results", self.group_path(assignment));
        let url = self.signed_url(
            &path,
            &[
                ("groupExecutedTime", report.group_executed_time_ms.to_string()),
                (
                    "applicationExecutedTime",
                    report.application_executed_time_ms.to_string(),
                ),
                ("completedRequestRange", report.completed.to_string()),
                ("failedRequestRange", report.failed.to_string()),
                ("resultCount", report.result_count.to_string()),
            ],
        )?;

        let body = reqwest::Body::wrap_stream(ReaderStream::new(results));
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn submit_errors(
        &self,
        assignment: &GroupAssignment,
        errors: &[RequestError],
    ) -> Result<(), CoordinatorError> {
        let path = format!("{}/error", self.group_path(assignment));
        let url = self.signed_url(&path, &[])?;
        let response = self
            .http_client
            .post(url)
            .json(errors)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_message(&self, message: &ControlMessage) -> Result<(), CoordinatorError> {
        let path = format!("{}/message", self.worker_path());
        let url = self.signed_url(&path, &[])?;
        debug!(message_type = message.message_type(), "sending control message");
        let response = self
            .http_client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn module_bundles(
        &self,
        module_name: &str,
        module_time: i64,
    ) -> Result<Vec<String>, CoordinatorError> {
        let path = format!("/worker/modules/{module_name}/{module_time}/urls.json");
        let url = self.signed_url(&path, &[])?;
        let response = self.http_client.get(url).send().await.map_err(transport_error)?;
        let body = Self::json_body(Self::check(response).await?).await?;

        let urls = body
            .get("bundleUrls")
            .or_else(|| body.get("jarUrls"))
            .and_then(Value::as_array)
            .ok_or_else(|| CoordinatorError::Decode("bundle list missing bundleUrls".into()))?;
        urls.iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoordinatorError::Decode(format!("invalid bundle URL {v}")))
            })
            .collect()
    }

    async fn download_bundle(&self, location: &str, dest: &Path) -> Result<(), CoordinatorError> {
        let url = if location.starts_with("http://") || location.starts_with("https://") {
            reqwest::Url::parse(location)
                .map_err(|e| CoordinatorError::Decode(format!("invalid bundle URL {location}: {e}")))?
        } else {
            self.signed_url(location, &[])?
        };

        let response = self.http_client.get(url).send().await.map_err(transport_error)?;
        let response = Self::check(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk.map_err(transport_error)?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    fn input_data_url(&self, assignment: &GroupAssignment, sequence_number: u64) -> String {
        let path = format!(
            "{}/requests/{sequence_number}/inputData",
            self.group_path(assignment)
        );
        self.signed_url(&path, &[])
            .map_or_else(|_| format!("{}{path}", self.base_url), |url| url.to_string())
    }
}

fn parse_request_line(line: &str) -> Result<RequestRecord, CoordinatorError> {
    let raw: Map<String, Value> = serde_json::from_str(line)
        .map_err(|e| CoordinatorError::Decode(format!("invalid request record: {e}")))?;
    RequestRecord::from_raw(raw)
        .ok_or_else(|| CoordinatorError::Decode("request record without sequence number".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_empty_response_is_no_work() {
        let response = parse_work_response(json!({})).unwrap();
        assert_eq!(response, WorkResponse::empty());
    }

    #[test]
    fn test_parse_module_instruction() {
        let response = parse_work_response(json!({
            "action": "loadModule",
            "moduleName": "geo",
            "moduleTime": 200,
            "moduleJarCount": 3
        }))
        .unwrap();
        assert_eq!(
            response.work,
            NextWork::ModuleStart {
                module_name: "geo".into(),
                module_time: 200,
                bundle_count: 3
            }
        );
    }

    #[test]
    fn test_parse_group_with_piggy_backed_messages() {
        let response = parse_work_response(json!({
            "groupId": "7-1",
            "batchJobId": 7,
            "businessApplicationName": "point",
            "moduleName": "geo",
            "moduleTime": 100,
            "messages": {
                "12": {"action": "cancelGroup", "groupId": "5-2"},
                "3": {"type": "securityChanged", "moduleName": "geo"},
                "x": {"type": "moduleStop", "moduleName": "geo"}
            }
        }))
        .unwrap();

        assert!(matches!(response.work, NextWork::Group(ref a) if a.group_id == "7-1"));
        let ids: Vec<i64> = response.messages.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 12]);
        assert_eq!(
            response.messages[1].1,
            ControlMessage::CancelGroup { group_id: "5-2".into() }
        );
    }

    #[test]
    fn test_parse_request_line() {
        let record = parse_request_line(r#"{"i":2,"x":"1.5"}"#).unwrap();
        assert_eq!(record.sequence_number, 2);
        assert!(parse_request_line(r#"{"x":1}"#).is_err());
        assert!(parse_request_line("not json").is_err());
    }
}
