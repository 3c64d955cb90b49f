use std::path::PathBuf;

use crate::models::ItemId;

/// 某个页面的一个历史候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// 所在输出目录名（如 `out2`）
    pub folder: String,
    pub path: PathBuf,
}

impl Candidate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 最终选择结果（写入来源日志）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestSelection {
    pub item: ItemId,
    /// 从 1 开始的候选序号
    pub index: usize,
    pub folder: String,
    pub file_name: String,
}
