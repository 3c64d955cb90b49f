//! 流程层
//!
//! - `item_state` - 单个页面在一轮中的阶段
//! - `generation` - 一批页面的 "脚本 → 重绘 → 落盘" 流程

pub mod generation;
pub mod item_state;

pub use generation::{GenerationFlow, RoundOutcome};
pub use item_state::{ItemPhase, ProgressTracker};
