//! 远程任务轮询
//!
//! 轮询本身是一个纯状态机（`PollPhase::advance`），睡眠通过 `Sleeper` 注入，
//! 测试里可以换成不等待的实现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::clients::batch_backend::BatchBackend;
use crate::clients::wire::{InlinedResponse, JobHandle, JobSnapshot, JobState};
use crate::error::RemoteError;

/// 轮询之间的等待
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 真实等待
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 立即返回（测试用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// 轮询结束时的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// 任务成功，附带按请求顺序排列的响应
    Succeeded(Vec<InlinedResponse>),
    /// 任务以非成功状态结束
    Failed(JobState),
    /// 轮询超时或连续出错，任务状态不可知
    Lost(String),
}

/// 轮询上限
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    /// 最多轮询次数，None 表示不限
    pub max_polls: Option<u32>,
    /// 连续出错达到该次数即放弃
    pub max_poll_errors: u32,
}

/// 轮询状态机
#[derive(Debug, Clone, PartialEq)]
pub enum PollPhase {
    Waiting { polls: u32, errors: u32 },
    Finished(PollOutcome),
}

impl PollPhase {
    pub fn start() -> Self {
        PollPhase::Waiting {
            polls: 0,
            errors: 0,
        }
    }

    /// 根据一次状态查询的结果推进状态
    pub fn advance(self, observation: Result<JobSnapshot, RemoteError>, limits: &PollLimits) -> Self {
        let (polls, errors) = match self {
            PollPhase::Waiting { polls, errors } => (polls + 1, errors),
            finished => return finished,
        };

        let errors = match observation {
            Ok(snapshot) if snapshot.state == JobState::Succeeded => {
                return PollPhase::Finished(PollOutcome::Succeeded(snapshot.responses));
            }
            Ok(snapshot) if snapshot.state.is_terminal() => {
                return PollPhase::Finished(PollOutcome::Failed(snapshot.state));
            }
            Ok(_) => 0,
            Err(e) => {
                let errors = errors + 1;
                if errors >= limits.max_poll_errors.max(1) {
                    return PollPhase::Finished(PollOutcome::Lost(format!(
                        "连续 {} 次查询失败，最后一次: {}",
                        errors, e
                    )));
                }
                errors
            }
        };

        match limits.max_polls {
            Some(max) if polls >= max => PollPhase::Finished(PollOutcome::Lost(format!(
                "轮询 {} 次后任务仍未结束",
                polls
            ))),
            _ => PollPhase::Waiting { polls, errors },
        }
    }
}

/// 任务轮询器
pub struct JobPoller {
    backend: Arc<dyn BatchBackend>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    limits: PollLimits,
}

impl JobPoller {
    pub fn new(
        backend: Arc<dyn BatchBackend>,
        sleeper: Arc<dyn Sleeper>,
        interval: Duration,
        limits: PollLimits,
    ) -> Self {
        Self {
            backend,
            sleeper,
            interval,
            limits,
        }
    }

    /// 轮询直到任务结束或放弃
    pub async fn wait(&self, handle: &JobHandle) -> PollOutcome {
        let mut phase = PollPhase::start();
        loop {
            let observation = self.backend.job_status(handle).await;
            match &observation {
                Ok(snapshot) => debug!("任务 {} 状态: {}", handle.name, snapshot.state),
                Err(e) => warn!("⚠️ 查询任务 {} 状态失败: {}", handle.name, e),
            }

            phase = phase.advance(observation, &self.limits);
            match phase {
                PollPhase::Finished(outcome) => {
                    match &outcome {
                        PollOutcome::Succeeded(responses) => {
                            info!("✓ 任务 {} 完成，返回 {} 条结果", handle.name, responses.len())
                        }
                        PollOutcome::Failed(state) => {
                            warn!("❌ 任务 {} 以 {} 结束", handle.name, state)
                        }
                        PollOutcome::Lost(reason) => {
                            warn!("❌ 放弃任务 {}: {}", handle.name, reason)
                        }
                    }
                    return outcome;
                }
                PollPhase::Waiting { .. } => self.sleeper.sleep(self.interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: PollLimits = PollLimits {
        max_polls: None,
        max_poll_errors: 3,
    };

    fn snapshot(state: JobState) -> Result<JobSnapshot, RemoteError> {
        Ok(JobSnapshot {
            state,
            responses: Vec::new(),
        })
    }

    fn transient() -> Result<JobSnapshot, RemoteError> {
        Err(RemoteError::Injected("timeout".to_string()))
    }

    #[test]
    fn test_non_terminal_keeps_waiting() {
        let phase = PollPhase::start()
            .advance(snapshot(JobState::Pending), &LIMITS)
            .advance(snapshot(JobState::Running), &LIMITS);
        assert_eq!(phase, PollPhase::Waiting { polls: 2, errors: 0 });
    }

    #[test]
    fn test_terminal_states_finish() {
        let done = PollPhase::start().advance(snapshot(JobState::Succeeded), &LIMITS);
        assert_eq!(done, PollPhase::Finished(PollOutcome::Succeeded(Vec::new())));

        let failed = PollPhase::start().advance(snapshot(JobState::Expired), &LIMITS);
        assert_eq!(failed, PollPhase::Finished(PollOutcome::Failed(JobState::Expired)));
    }

    #[test]
    fn test_consecutive_errors_end_as_lost() {
        let phase = PollPhase::start()
            .advance(transient(), &LIMITS)
            .advance(transient(), &LIMITS);
        assert_eq!(phase, PollPhase::Waiting { polls: 2, errors: 2 });

        // 中间成功一次会清零
        let phase = phase
            .advance(snapshot(JobState::Running), &LIMITS)
            .advance(transient(), &LIMITS)
            .advance(transient(), &LIMITS);
        assert!(matches!(phase, PollPhase::Waiting { errors: 2, .. }));

        let phase = phase.advance(transient(), &LIMITS);
        assert!(matches!(phase, PollPhase::Finished(PollOutcome::Lost(_))));
    }

    #[test]
    fn test_max_polls_bounds_waiting() {
        let limits = PollLimits {
            max_polls: Some(2),
            max_poll_errors: 3,
        };
        let phase = PollPhase::start()
            .advance(snapshot(JobState::Running), &limits)
            .advance(snapshot(JobState::Running), &limits);
        assert!(matches!(phase, PollPhase::Finished(PollOutcome::Lost(_))));
    }
}
