//! 响应解码
//!
//! 把一条批处理结果解码为期望类型的产物，解不出来时给出原因。

use crate::clients::wire::{Content, InlinedResponse};

/// 期望的产物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Text,
    Image,
}

/// 解码出的产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image { mime: String, bytes: Vec<u8> },
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Artifact(Payload),
    Undecodable(String),
}

impl Extraction {
    /// 按期望类型解码
    pub fn from_response(response: &InlinedResponse, expect: Expect) -> Self {
        if let Some(error) = &response.error {
            return Extraction::Undecodable(format!("请求出错: {}", error));
        }
        let Some(body) = &response.response else {
            return Extraction::Undecodable("没有响应内容".to_string());
        };
        if let Some(reason) = body
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Extraction::Undecodable(format!("请求被拦截: {}", reason));
        }

        let contents: Vec<&Content> = body
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .collect();

        match expect {
            Expect::Text => extract_text(&contents),
            Expect::Image => extract_image(&contents),
        }
    }
}

/// 第一个含文本的候选，拼接其所有文本部分并去掉首尾空白
fn extract_text(contents: &[&Content]) -> Extraction {
    for content in contents {
        let texts: Vec<&str> = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
            .collect();
        if texts.is_empty() {
            continue;
        }
        let joined = texts.concat();
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            return Extraction::Undecodable("响应文本为空".to_string());
        }
        return Extraction::Artifact(Payload::Text(trimmed.to_string()));
    }
    Extraction::Undecodable("响应中没有文本".to_string())
}

/// 第一个 MIME 为 image/* 的内嵌部分
fn extract_image(contents: &[&Content]) -> Extraction {
    let inline = contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.inline_data.as_ref())
        .find(|d| d.mime_type.starts_with("image/"));

    let Some(inline) = inline else {
        return Extraction::Undecodable("响应中没有图片".to_string());
    };
    match inline.decode() {
        Ok(bytes) if !bytes.is_empty() => Extraction::Artifact(Payload::Image {
            mime: inline.mime_type.clone(),
            bytes,
        }),
        Ok(_) => Extraction::Undecodable("图片数据为空".to_string()),
        Err(e) => Extraction::Undecodable(format!("图片 base64 解码失败: {}", e)),
    }
}
