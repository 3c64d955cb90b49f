//! 请求构造
//!
//! 每个阶段的请求都是 "提示词 + 图片"，评估和挑选会用标签把多张图片分开。

use std::path::Path;

use crate::clients::wire::{GenerateRequest, Modality, Part};
use crate::error::FileError;
use crate::models::Candidate;
use crate::services::prompts;

/// 把累计的评估意见整理成补充说明段落；没有意见时返回空串
///
/// 每条意见一个 `- ` 开头的条目，意见内部的换行合并为空格。
pub fn feedback_block(feedback: &[String]) -> String {
    let bullets: Vec<String> = feedback
        .iter()
        .map(|critique| collapse_whitespace_lines(critique))
        .filter(|line| !line.is_empty())
        .map(|line| format!("- {}\n", line))
        .collect();

    if bullets.is_empty() {
        return String::new();
    }
    format!("\n\n{}\n{}", prompts::FEEDBACK_HEADER, bullets.concat())
}

fn collapse_whitespace_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 脚本生成提示词
pub fn script_prompt_text(feedback: &[String]) -> String {
    prompts::script_prompt() + &feedback_block(feedback)
}

/// 重绘提示词，末尾附上该页脚本
pub fn image_prompt_text(script: &str, feedback: &[String]) -> String {
    format!(
        "{}{}\n\n{}\n{}",
        prompts::image_edit_prompt(),
        feedback_block(feedback),
        prompts::SCRIPT_HEADER,
        script.trim()
    )
}

/// 脚本请求：提示词 + 原图，期望文本
pub fn script_request(source: &Path, feedback: &[String]) -> Result<GenerateRequest, FileError> {
    Ok(GenerateRequest::user(
        vec![Part::text(script_prompt_text(feedback)), Part::inline_file(source)?],
        Modality::Text,
    ))
}

/// 重绘请求：提示词（含脚本）+ 原图，期望图片
pub fn image_request(
    source: &Path,
    script: &str,
    feedback: &[String],
) -> Result<GenerateRequest, FileError> {
    Ok(GenerateRequest::user(
        vec![
            Part::text(image_prompt_text(script, feedback)),
            Part::inline_file(source)?,
        ],
        Modality::Image,
    ))
}

/// 评估请求：原图与译图分别用标签包裹
pub fn eval_request(original: &Path, translated: &Path) -> Result<GenerateRequest, FileError> {
    Ok(GenerateRequest::user(
        vec![
            Part::text(prompts::eval_prompt()),
            Part::text("<ORIGINAL_IMAGE>"),
            Part::inline_file(original)?,
            Part::text("</ORIGINAL_IMAGE>"),
            Part::text("<TRANSLATED_IMAGE>"),
            Part::inline_file(translated)?,
            Part::text("</TRANSLATED_IMAGE>"),
        ],
        Modality::Text,
    ))
}

/// 挑选请求：原图 + `<CANDIDATE_i>` 标签包裹的各个候选
pub fn rank_request(original: &Path, candidates: &[Candidate]) -> Result<GenerateRequest, FileError> {
    let mut parts = vec![
        Part::text(prompts::RANK_PROMPT),
        Part::text("<ORIGINAL_IMAGE>"),
        Part::inline_file(original)?,
        Part::text("</ORIGINAL_IMAGE>"),
    ];
    for (i, candidate) in candidates.iter().enumerate() {
        let n = i + 1;
        parts.push(Part::text(format!("<CANDIDATE_{}>", n)));
        parts.push(Part::inline_file(&candidate.path)?);
        parts.push(Part::text(format!("</CANDIDATE_{}>", n)));
    }
    Ok(GenerateRequest::user(parts, Modality::Text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_block_empty_without_critiques() {
        assert_eq!(feedback_block(&[]), "");
        assert_eq!(feedback_block(&["  \n ".to_string()]), "");
    }

    #[test]
    fn test_feedback_bullets_collapse_newlines() {
        let block = feedback_block(&[
            "Fix bubble 2.\nUse smaller font.".to_string(),
            "Translate the SFX.".to_string(),
        ]);
        assert_eq!(
            block,
            format!(
                "\n\n{}\n- Fix bubble 2. Use smaller font.\n- Translate the SFX.\n",
                prompts::FEEDBACK_HEADER
            )
        );
    }

    #[test]
    fn test_image_prompt_ends_with_script() {
        let prompt = image_prompt_text("  Line 1: \"안녕\"  ", &["Keep it short.".to_string()]);
        assert!(prompt.contains("- Keep it short.\n"));
        assert!(prompt.ends_with("Translation script for this page:\nLine 1: \"안녕\""));
        let feedback_at = prompt.find(prompts::FEEDBACK_HEADER).unwrap();
        let script_at = prompt.find(prompts::SCRIPT_HEADER).unwrap();
        assert!(feedback_at < script_at);
    }

    #[test]
    fn test_eval_request_tags_both_images() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("1.png");
        let translated = dir.path().join("1.jpg");
        std::fs::write(&original, b"orig").unwrap();
        std::fs::write(&translated, b"trans").unwrap();

        let request = eval_request(&original, &translated).unwrap();
        let texts: Vec<&str> = request.texts().skip(1).collect();
        assert_eq!(
            texts,
            vec!["<ORIGINAL_IMAGE>", "</ORIGINAL_IMAGE>", "<TRANSLATED_IMAGE>", "</TRANSLATED_IMAGE>"]
        );
        let mimes: Vec<&str> = request.inline_parts().map(|d| d.mime_type.as_str()).collect();
        assert_eq!(mimes, vec!["image/png", "image/jpeg"]);
    }
}
