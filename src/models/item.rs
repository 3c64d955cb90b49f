//! 页面标识与自然排序

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// 页面的规范标识
///
/// 由源文件名推导：去掉扩展名，再去掉末尾的一个括号后缀，
/// 因此 `012 (1).png` 与 `012.png` 的标识都是 `012`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId(String);

impl ItemId {
    /// 直接用规范标识构造
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 从文件名推导规范标识
    pub fn from_filename(filename: &str) -> Self {
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        Self(strip_trailing_paren_suffix(&stem))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

fn paren_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\([^()]*\)$").expect("括号后缀正则非法"))
}

/// 去掉末尾的一个括号后缀（连同前面的空白）
pub fn strip_trailing_paren_suffix(stem: &str) -> String {
    paren_suffix_re().replace(stem, "").into_owned()
}

/// 自然排序比较：数字段按整数比较，文本段忽略大小写
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = natural_key(a);
    let right = natural_key(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = l.cmp(r);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Number(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            // 键总是以文本段开头并交替出现，同一位置类型不同只在空文本段上发生
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 拆成 文本/数字 交替的段，首段总是文本（可能为空）
fn natural_key(s: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            if digits.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text).to_lowercase()));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                segments.push(Segment::Number(normalize_number(&std::mem::take(&mut digits))));
            }
            text.push(ch);
        }
    }

    if !digits.is_empty() {
        segments.push(Segment::Number(normalize_number(&digits)));
    } else {
        segments.push(Segment::Text(text.to_lowercase()));
    }
    segments
}

fn normalize_number(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_strips_extension_and_suffix() {
        assert_eq!(ItemId::from_filename("012 (1).png").as_str(), "012");
        assert_eq!(ItemId::from_filename("012.png").as_str(), "012");
        assert_eq!(ItemId::from_filename("page(2).jpg").as_str(), "page");
        // 只去掉一个后缀
        assert_eq!(ItemId::from_filename("a (1) (2).webp").as_str(), "a (1)");
    }

    #[test]
    fn test_natural_order() {
        let mut ids: Vec<ItemId> = ["2.png", "10.png", "1.png"]
            .iter()
            .map(|f| ItemId::from_filename(f))
            .collect();
        ids.sort();
        let ordered: Vec<&str> = ids.iter().map(ItemId::as_str).collect();
        assert_eq!(ordered, vec!["1", "2", "10"]);
    }

    #[test]
    fn test_natural_order_mixed_text() {
        assert_eq!(natural_cmp("ch2_p10", "ch2_p9"), Ordering::Greater);
        assert_eq!(natural_cmp("Page3", "page3"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
        assert_eq!(
            natural_cmp("99999999999999999999999", "100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_leading_zeros_compare_numerically_but_stay_distinct() {
        let a = ItemId::new("007");
        let b = ItemId::new("7");
        assert_eq!(natural_cmp(a.as_str(), b.as_str()), Ordering::Equal);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }
}
