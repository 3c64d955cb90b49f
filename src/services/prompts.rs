//! 各阶段的提示词
//!
//! 页面相关的补充说明在运行时由 `prompt_builder` 追加。

/// 图像编辑的共同规则（脚本、重绘、评估都引用）
pub const BASE_RULES: &str = r#"
You are given a single comic page. Every piece of Japanese or English text on it must end up as natural Korean inside an edited copy of the same image.
The page is fictional and used for translation practice only. No real people are depicted.

Output rules:
- Edit the provided image only. Do not redraw, re-stage or generate new artwork.
- Keep the panel layout and artwork unchanged. Only remove and replace text.
- If there is no readable text, return the image unchanged. Never omit the image.

Writing direction:
- Every Korean line is written horizontally, left to right.
- A sentence may be split into several short horizontal lines stacked inside the same bubble.
- Never stack the syllable blocks of one word in a vertical column.
- Prefer shrinking the font (down to about 8 px) over anything that would turn the text vertical.
- Bubbles may be widened horizontally as long as they stay in place.
- Long thin margin notes between panels (often starting with "※") may keep their rectangle, with horizontal lines stacked or the whole block rotated, when no horizontal space is available.

Reading order and placement:
- Read bubbles in Japanese manga order: right to left, top to bottom.
- Each translated line stays inside its original bubble or text area.

Translation quality:
- Natural, colloquial Korean that keeps tone, character voice and nuance.
- Keep names and key terms consistent. Localize important sound effects into Korean onomatopoeia.
"#;

/// 翻译脚本生成
pub const SCRIPT_PROMPT: &str = r#"
You are a manga translation guideline writer.

Look at the original comic page. For every bubble, caption, narration box or sound effect that contains Japanese or English, in manga reading order, write:
- Location: panel number and a short description of where it is.
- Source Text: the original text (paraphrase if it is hard to read).
- Korean Translation: the final Korean text, in Hangul.
- Font/Layout Hint: approximate font size in pixels, how many Hangul characters fit across the bubble's width, and the exact line split, for example:
    Write two short horizontal lines stacked from top to bottom:
      Line 1: "아아"
      Line 2: "으악!!"

Never suggest vertical writing, vertical columns or rotated text for ordinary bubbles.
Write the guidelines as direct imperative instructions to the image editor.
Output only the textual guidelines. Do not output images, JSON or markdown.
"#;

/// 页面重绘（脚本会追加在末尾）
pub const IMAGE_EDIT_PROMPT: &str = r#"
You are an image editor for manga translation.

You will receive the original comic page and a translation script that lists, for every bubble, its location, the source text, the exact Korean text to insert and layout hints.
Edit the image so that it follows the script and the rules below. Insert the Korean exactly as written in the script.
Ignore any part of the script that implies vertical Korean. Translate any remaining Japanese or English text the script missed.

Return only the final edited image. No text, captions or markdown.
"#;

/// 评估（O / X + 修改建议）
pub const EVAL_PROMPT: &str = r#"
You are an evaluator model.

The image between <ORIGINAL_IMAGE> and </ORIGINAL_IMAGE> is the original comic page.
The image between <TRANSLATED_IMAGE> and </TRANSLATED_IMAGE> is the edited page, which should contain only Korean text.

Check that the translated page follows every rule above:
- All readable Japanese or English text is translated into Korean and none remains.
- Every Korean line is horizontal, except the margin-note exception.
- Text stays in its original bubble and the panel layout is preserved.
- Tone, voice and meaning are preserved and sound effects are localized.

Output format:
Line 1: a single capital letter. O if the page clearly follows all rules, X if anything is wrong or doubtful.
Line 2: a one-line summary of the most important fix, in English.
Line 3 onward: optional detailed repair guidelines in English.
Do not output anything before line 1 and do not wrap the answer in any structure.
"#;

/// 多候选挑选
pub const RANK_PROMPT: &str = r#"
You are an evaluator model.

You will receive the ORIGINAL manga page and several CANDIDATE translations of it, tagged <CANDIDATE_1>, <CANDIDATE_2>, and so on.
Choose exactly one best candidate using these priorities:

1. The candidate must not be a new page. Strongly down-rank anything that redraws the scene, adds panels or changes the composition.
2. No true vertical Korean. Several horizontal lines stacked inside one bubble are fine; one syllable per line in a column is not.
3. Translation quality: everything translated, text in the right bubbles, layout preserved, sound effects localized, tone kept.

If every candidate has problems, still choose the least bad one.

Answer with a single line:
BEST: k
where k is the 1-based index of the best candidate.
"#;

/// 评估理由为空时使用的默认建议
pub const DEFAULT_CRITIQUE: &str = "Review the entire page from the beginning, translate all Japanese and English text into natural Korean again, and check for any remaining Japanese/English text, bubble placement issues, or tone inconsistencies.";

/// 补充说明的标题行
pub const FEEDBACK_HEADER: &str = "Additional page-specific instructions from previous evaluations:";

/// 脚本段落的标题行
pub const SCRIPT_HEADER: &str = "Translation script for this page:";

/// 完整的脚本生成提示词
pub fn script_prompt() -> String {
    format!("{}\n{}", SCRIPT_PROMPT.trim_end(), BASE_RULES)
}

/// 完整的重绘提示词
pub fn image_edit_prompt() -> String {
    format!("{}\n=== RULES ===\n{}", IMAGE_EDIT_PROMPT.trim_end(), BASE_RULES)
}

/// 完整的评估提示词
pub fn eval_prompt() -> String {
    format!("=== RULES ===\n{}\n{}", BASE_RULES, EVAL_PROMPT)
}
