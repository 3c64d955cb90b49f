//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责轮次调度和整体流程，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批处理应用
//! - 管理应用生命周期（校验配置、创建远程后端）
//! - 加载页面目录
//! - 依次调用精修与挑选
//! - 输出全局统计信息
//!
//! ### `refinement` - 精修控制器
//! - 初始轮、断点恢复、精修轮
//! - 沿用已通过的页面
//! - 生成阶段重试耗尽时终止
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (App)
//!     ↓
//! refinement (处理所有轮次) / services::ranker (最终挑选)
//!     ↓
//! workflow::GenerationFlow (处理一批页面的一次生成)
//!     ↓
//! services (能力层：stage_executor / evaluation / prompt_builder)
//!     ↓
//! infrastructure (基础设施：artifact_store / poller) + clients (远程后端)
//! ```

pub mod batch_processor;
pub mod refinement;

// 重新导出主要类型
pub use batch_processor::App;
pub use refinement::{RefinementController, RefinementSummary};
