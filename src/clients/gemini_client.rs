/// Gemini 批处理 API 客户端
///
/// 封装 `batchGenerateContent` 提交与 `batches/{id}` 状态查询
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::clients::batch_backend::BatchBackend;
use crate::clients::wire::{GenerateRequest, InlinedResponse, JobHandle, JobSnapshot, JobState};
use crate::config::Config;
use crate::error::RemoteError;

/// Gemini 批处理客户端
pub struct GeminiBatchClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiBatchClient {
    /// 创建新的客户端
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 发送请求并把响应体解析为 JSON
    async fn send_json(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, RemoteError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::request_failed(endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::request_failed(endpoint, e))?;

        if !status.is_success() {
            return Err(RemoteError::BadResponse {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| RemoteError::JsonParseFailed {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl BatchBackend for GeminiBatchClient {
    async fn create_job(
        &self,
        model: &str,
        display_name: &str,
        requests: &[GenerateRequest],
    ) -> Result<JobHandle, RemoteError> {
        let endpoint = self.url(&format!("{}:batchGenerateContent", model));
        debug!("提交批处理任务 {}，共 {} 个请求", display_name, requests.len());

        let body = build_create_body(display_name, requests);
        let value = self
            .send_json(&endpoint, self.http.post(&endpoint).json(&body))
            .await?;

        value
            .get("name")
            .and_then(Value::as_str)
            .map(|name| JobHandle {
                name: name.to_string(),
            })
            .ok_or(RemoteError::MissingJobName { endpoint })
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<JobSnapshot, RemoteError> {
        let endpoint = self.url(&handle.name);
        let value = self.send_json(&endpoint, self.http.get(&endpoint)).await?;
        parse_snapshot(&value).map_err(|source| RemoteError::JsonParseFailed { endpoint, source })
    }
}

// ========== 请求/响应转换 ==========

/// 构造批处理提交请求体，每个请求带上按位置编号的 key
fn build_create_body(display_name: &str, requests: &[GenerateRequest]) -> Value {
    let inlined: Vec<Value> = requests
        .iter()
        .enumerate()
        .map(|(i, request)| {
            json!({
                "request": request,
                "metadata": { "key": format!("request-{}", i + 1) }
            })
        })
        .collect();

    json!({
        "batch": {
            "displayName": display_name,
            "inputConfig": {
                "requests": { "requests": inlined }
            }
        }
    })
}

/// 解析任务状态
///
/// 状态可能在 `metadata.state` 或顶层 `state`；
/// 结果可能在 `response.inlinedResponses` 或 `metadata.output.inlinedResponses`。
fn parse_snapshot(value: &Value) -> Result<JobSnapshot, serde_json::Error> {
    let metadata = value.get("metadata").unwrap_or(&Value::Null);

    let raw_state = metadata
        .get("state")
        .or_else(|| value.get("state"))
        .and_then(Value::as_str);

    let state = match raw_state {
        Some(raw) => JobState::parse(raw),
        None if value.get("done").and_then(Value::as_bool) == Some(true) => {
            if value.get("error").is_some() {
                JobState::Failed
            } else {
                JobState::Succeeded
            }
        }
        None => JobState::Pending,
    };

    let responses = if state == JobState::Succeeded {
        let list = value
            .pointer("/response/inlinedResponses/inlinedResponses")
            .or_else(|| value.pointer("/metadata/output/inlinedResponses/inlinedResponses"))
            .or_else(|| value.pointer("/dest/inlinedResponses"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value::<Vec<InlinedResponse>>(list)?
    } else {
        Vec::new()
    };

    Ok(JobSnapshot { state, responses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::wire::{Modality, Part};

    #[test]
    fn test_create_body_shape() {
        let requests = vec![GenerateRequest::user(vec![Part::text("a")], Modality::Text)];
        let body = build_create_body("script-iter0-001", &requests);
        assert_eq!(body["batch"]["displayName"], "script-iter0-001");
        let first = &body["batch"]["inputConfig"]["requests"]["requests"][0];
        assert_eq!(first["metadata"]["key"], "request-1");
        assert_eq!(first["request"]["contents"][0]["parts"][0]["text"], "a");
    }

    #[test]
    fn test_parse_snapshot_succeeded_with_responses() {
        let value = json!({
            "name": "batches/abc",
            "metadata": { "state": "BATCH_STATE_SUCCEEDED" },
            "done": true,
            "response": {
                "inlinedResponses": {
                    "inlinedResponses": [
                        { "response": { "candidates": [ { "content": { "parts": [ { "text": "O" } ] } } ] } },
                        { "error": { "code": 13, "message": "internal" } }
                    ]
                }
            }
        });
        let snapshot = parse_snapshot(&value).unwrap();
        assert_eq!(snapshot.state, JobState::Succeeded);
        assert_eq!(snapshot.responses.len(), 2);
        assert!(snapshot.responses[1].error.is_some());
    }

    #[test]
    fn test_parse_snapshot_running() {
        let value = json!({ "name": "batches/abc", "metadata": { "state": "JOB_STATE_RUNNING" } });
        let snapshot = parse_snapshot(&value).unwrap();
        assert_eq!(snapshot.state, JobState::Running);
        assert!(snapshot.responses.is_empty());
    }

    /// 连通性测试（需要真实 API Key）
    #[tokio::test]
    #[ignore]
    async fn test_live_create_and_poll() {
        let _ = tracing_subscriber::fmt::try_init();

        let config = Config::from_env();
        let client = GeminiBatchClient::new(&config);
        let requests = vec![GenerateRequest::user(
            vec![Part::text("Reply with the single letter O.")],
            Modality::Text,
        )];

        let handle = client
            .create_job(&config.text_model, "connectivity-check", &requests)
            .await
            .expect("提交任务失败");
        println!("任务名: {}", handle.name);

        let snapshot = client.job_status(&handle).await.expect("查询任务失败");
        println!("任务状态: {}", snapshot.state);
    }
}
