use std::collections::BTreeMap;

use crate::models::ItemId;

/// 每个页面累计的评估意见
///
/// 按时间顺序追加，从不删减。生成新一轮请求时全部作为补充说明附上。
#[derive(Debug, Clone, Default)]
pub struct FeedbackAccumulator {
    entries: BTreeMap<ItemId, Vec<String>>,
}

impl FeedbackAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条意见，空白意见忽略
    pub fn push(&mut self, item: &ItemId, critique: &str) {
        let critique = critique.trim();
        if critique.is_empty() {
            return;
        }
        self.entries
            .entry(item.clone())
            .or_default()
            .push(critique.to_string());
    }

    /// 某页面的全部意见（没有时为空切片）
    pub fn for_item(&self, item: &ItemId) -> &[String] {
        self.entries.get(item).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 有意见的页面数
    pub fn item_count(&self) -> usize {
        self.entries.len()
    }
}
