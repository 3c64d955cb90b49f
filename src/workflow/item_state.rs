//! 页面处理状态
//!
//! 每个页面在一轮中经历 `Pending → Scripted → Generated → {Passed, Failed}`，
//! 失败的页面在下一轮开始时回到 `Pending`。
//!
//! 状态只用于进度统计和日志，待处理的页面始终以磁盘上的产物为准。

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::models::{ItemId, Verdict};

/// 页面在当前轮次中的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemPhase {
    Pending,
    Scripted,
    Generated,
    Passed,
    Failed,
}

impl ItemPhase {
    /// 是否允许从当前阶段进入目标阶段
    pub fn can_transition_to(self, next: ItemPhase) -> bool {
        use ItemPhase::*;
        matches!(
            (self, next),
            (Pending, Scripted)
                | (Scripted, Generated)
                | (Generated, Passed)
                | (Generated, Failed)
                | (Failed, Pending)
        )
    }

    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => ItemPhase::Passed,
            Verdict::Fail => ItemPhase::Failed,
        }
    }
}

impl fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemPhase::Pending => "待处理",
            ItemPhase::Scripted => "已生成脚本",
            ItemPhase::Generated => "已生成图片",
            ItemPhase::Passed => "已通过",
            ItemPhase::Failed => "未通过",
        };
        f.write_str(name)
    }
}

/// 所有页面的阶段跟踪
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    phases: BTreeMap<ItemId, ItemPhase>,
}

impl ProgressTracker {
    /// 所有页面从 `Pending` 开始
    pub fn new<'a>(items: impl IntoIterator<Item = &'a ItemId>) -> Self {
        Self {
            phases: items
                .into_iter()
                .map(|id| (id.clone(), ItemPhase::Pending))
                .collect(),
        }
    }

    pub fn phase(&self, item: &ItemId) -> Option<ItemPhase> {
        self.phases.get(item).copied()
    }

    /// 推进到目标阶段；已处于目标阶段时不做任何事
    ///
    /// 非法转换会被拒绝并记录警告，返回 false。
    pub fn advance(&mut self, item: &ItemId, next: ItemPhase) -> bool {
        let Some(current) = self.phases.get_mut(item) else {
            warn!("[页面 {}] 未被跟踪，忽略状态 {}", item, next);
            return false;
        };
        if *current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!("[页面 {}] 非法状态转换: {} → {}", item, current, next);
            return false;
        }
        *current = next;
        true
    }

    /// 按磁盘上的事实直接设置阶段（恢复运行、沿用通过结果时使用）
    pub fn restore(&mut self, item: &ItemId, phase: ItemPhase) {
        if let Some(current) = self.phases.get_mut(item) {
            *current = phase;
        }
    }

    /// 新一轮开始：未通过的页面回到 `Pending`
    pub fn begin_iteration(&mut self) {
        for phase in self.phases.values_mut() {
            if *phase == ItemPhase::Failed {
                *phase = ItemPhase::Pending;
            }
        }
    }

    /// 处于某阶段的页面数
    pub fn count(&self, phase: ItemPhase) -> usize {
        self.phases.values().filter(|p| **p == phase).count()
    }
}
