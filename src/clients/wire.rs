//! 远程批处理服务的请求/响应结构
//!
//! 字段命名与 Gemini REST 接口一致（camelCase）。

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::FileError;

/// 响应模态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Image,
}

/// 单个生成请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    /// 单条 user 消息，指定期望的响应模态
    pub fn user(parts: Vec<Part>, modality: Modality) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: vec![modality],
            },
        }
    }

    /// 所有文本部分（测试与日志使用）
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
    }

    /// 所有内嵌二进制部分
    pub fn inline_parts(&self) -> impl Iterator<Item = &InlineData> {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.inline_data.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// 消息的一个部分：文本或内嵌二进制
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: BASE64.encode(bytes),
            }),
        }
    }

    /// 读取图片文件作为内嵌部分，MIME 按扩展名推断，默认 image/png
    pub fn inline_file(path: &Path) -> Result<Self, FileError> {
        let bytes = std::fs::read(path).map_err(|e| FileError::read(path, e))?;
        let mime = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "image/png".to_string());
        Ok(Self::inline(mime, &bytes))
    }
}

/// base64 编码的内嵌数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }
}

/// 单个请求的生成结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<ResponseCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

/// 批处理结果列表中的一项：要么有响应，要么有错误
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlinedResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<GenerateContentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
}

impl InlinedResponse {
    /// 只含一段文本的响应
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_parts(vec![Part::text(text)])
    }

    /// 只含一张图片的响应
    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::with_parts(vec![Part::inline(mime_type, bytes)])
    }

    pub fn with_parts(parts: Vec<Part>) -> Self {
        Self {
            response: Some(GenerateContentResponse {
                candidates: vec![ResponseCandidate {
                    content: Some(Content {
                        role: Some("model".to_string()),
                        parts,
                    }),
                    finish_reason: Some("STOP".to_string()),
                }],
                prompt_feedback: None,
            }),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(serde_json::json!({ "message": message.into() })),
        }
    }
}

/// 远程任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
    Unknown(String),
}

impl JobState {
    /// 同时接受 `JOB_STATE_*` 与 `BATCH_STATE_*` 两种写法
    pub fn parse(raw: &str) -> Self {
        let name = raw
            .trim()
            .trim_start_matches("JOB_STATE_")
            .trim_start_matches("BATCH_STATE_");
        match name {
            "PENDING" | "QUEUED" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed,
            "CANCELLED" => JobState::Cancelled,
            "EXPIRED" => JobState::Expired,
            _ => JobState::Unknown(raw.to_string()),
        }
    }

    /// 到达后不会再有进展的状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled | JobState::Expired
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => f.write_str("PENDING"),
            JobState::Running => f.write_str("RUNNING"),
            JobState::Succeeded => f.write_str("SUCCEEDED"),
            JobState::Failed => f.write_str("FAILED"),
            JobState::Cancelled => f.write_str("CANCELLED"),
            JobState::Expired => f.write_str("EXPIRED"),
            JobState::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
        }
    }
}

/// 已提交任务的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
}

/// 一次状态查询的结果；`responses` 仅在成功时非空，且与请求顺序一致
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub state: JobState,
    pub responses: Vec<InlinedResponse>,
}
