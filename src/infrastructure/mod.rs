//! 基础设施层
//!
//! - `artifact_store` - 磁盘上的脚本缓存与输出目录
//! - `poller` - 远程任务轮询状态机

pub mod artifact_store;
pub mod poller;

pub use artifact_store::{OutputLayout, ScriptCache};
pub use poller::{JobPoller, NoopSleeper, PollLimits, PollOutcome, PollPhase, Sleeper, TokioSleeper};
