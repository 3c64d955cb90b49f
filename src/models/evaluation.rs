//! 评估判定与记录

use std::fmt;

use crate::models::ItemId;

/// 评估判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// 写入日志的标记
    pub fn token(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }

    /// 解析日志中的标记，兼容旧的 O / X 写法；无法识别时按失败处理
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "PASS" | "O" => Verdict::Pass,
            _ => Verdict::Fail,
        }
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// 记录来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    /// 模型给出的判定
    Model,
    /// 已通过页面沿用上一轮的判定
    CarriedForward,
    /// 评估重试耗尽后的兜底判定（不落盘）
    Fallback,
}

/// 一条评估记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRecord {
    pub iteration: u32,
    pub item: ItemId,
    pub verdict: Verdict,
    pub critique: String,
    pub origin: RecordOrigin,
}

impl EvaluationRecord {
    pub fn new(
        iteration: u32,
        item: ItemId,
        verdict: Verdict,
        critique: impl Into<String>,
        origin: RecordOrigin,
    ) -> Self {
        Self {
            iteration,
            item,
            verdict,
            critique: critique.into(),
            origin,
        }
    }

    /// 是否需要写入日志
    pub fn is_persistent(&self) -> bool {
        !matches!(self.origin, RecordOrigin::Fallback)
    }
}
