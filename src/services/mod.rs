//! 业务能力层
//!
//! - `stage_executor` - 分块提交、轮询、按位置解码
//! - `evaluation` - 逐目录评估、判定缓存与累计意见
//! - `ranker` - 多候选挑选与最终收集
//! - `prompt_builder` / `prompts` - 各阶段请求

pub mod evaluation;
pub mod extract;
pub mod prompt_builder;
pub mod prompts;
pub mod ranker;
pub mod stage_executor;

pub use evaluation::{parse_evaluation, EvaluationAccumulator, EvaluationLog, FolderEvaluation, VerdictCache};
pub use extract::{Expect, Extraction, Payload};
pub use ranker::{parse_best_index, SelectionRanker, SelectionSummary};
pub use stage_executor::{StageExecutor, StageReport, StageRequest, StageSpec};
