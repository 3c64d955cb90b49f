//! # Page Refiner
//!
//! 一个基于远程批处理生成服务的漫画页面精修流水线
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `clients/` - 远程批处理后端（`BatchBackend` trait、Gemini 实现、测试用脚本后端）
//! - `infrastructure/` - 磁盘产物（脚本缓存、输出目录）与任务轮询状态机
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `StageExecutor` - 分块提交、轮询、按位置解码
//! - `EvaluationAccumulator` - 评估、判定缓存、累计意见
//! - `SelectionRanker` - 多候选挑选与最终收集
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一批页面的一次生成"流程
//! - `GenerationFlow` - 脚本 → 重绘 → 落盘
//! - `ProgressTracker` - 页面阶段跟踪
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/refinement` - 精修控制器，管理所有轮次
//! - `orchestrator/batch_processor` - 应用入口，组装组件
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{BatchBackend, GeminiBatchClient, ScriptedBackend};
pub use config::Config;
pub use error::{ConfigError, FileError, PipelineError, PipelineResult, RemoteError};
pub use infrastructure::{NoopSleeper, Sleeper, TokioSleeper};
pub use models::{Catalog, ItemId, Verdict};
pub use orchestrator::{App, RefinementController, RefinementSummary};
pub use services::{SelectionRanker, SelectionSummary, StageExecutor};
