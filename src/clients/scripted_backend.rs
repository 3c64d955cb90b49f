//! 内存中的批处理服务（测试用）
//!
//! 提交任务时按请求逐个调用应答函数生成结果，之后的状态查询直接返回。
//! 可以注入提交失败、任务失败和延迟完成，也会记录收到的每个任务。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::clients::batch_backend::BatchBackend;
use crate::clients::wire::{GenerateRequest, InlinedResponse, JobHandle, JobSnapshot, JobState};
use crate::error::RemoteError;

/// 应答函数看到的任务信息
#[derive(Debug, Clone)]
pub struct JobContext {
    pub model: String,
    pub display_name: String,
}

/// 已提交的任务记录
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub name: String,
    pub model: String,
    pub display_name: String,
    pub requests: Vec<GenerateRequest>,
}

type Responder = dyn Fn(&JobContext, &GenerateRequest) -> InlinedResponse + Send + Sync;

#[derive(Debug)]
struct StoredJob {
    polls_remaining: u32,
    final_state: JobState,
    responses: Vec<InlinedResponse>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    jobs: HashMap<String, StoredJob>,
    submitted: Vec<SubmittedJob>,
    fail_creates: u32,
    fail_jobs: u32,
    polls_before_done: u32,
    status_calls: usize,
}

/// 脚本化的批处理后端
pub struct ScriptedBackend {
    responder: Box<Responder>,
    state: Mutex<ScriptedState>,
}

impl ScriptedBackend {
    pub fn new(
        responder: impl Fn(&JobContext, &GenerateRequest) -> InlinedResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 之后的任务先报告若干次 RUNNING 再结束
    pub fn with_polls_before_done(self, polls: u32) -> Self {
        self.state().polls_before_done = polls;
        self
    }

    /// 接下来的 n 次提交直接报错
    pub fn fail_next_creates(&self, n: u32) {
        self.state().fail_creates = n;
    }

    /// 接下来的 n 个任务以 FAILED 结束
    pub fn fail_next_jobs(&self, n: u32) {
        self.state().fail_jobs = n;
    }

    /// 所有已接受的任务，按提交顺序
    pub fn submitted_jobs(&self) -> Vec<SubmittedJob> {
        self.state().submitted.clone()
    }

    /// 已接受的任务数
    pub fn job_count(&self) -> usize {
        self.state().submitted.len()
    }

    /// 所有任务中的请求总数
    pub fn request_count(&self) -> usize {
        self.state().submitted.iter().map(|job| job.requests.len()).sum()
    }

    /// 显示名以指定前缀开头的任务中的请求数
    pub fn request_count_for(&self, label_prefix: &str) -> usize {
        self.state()
            .submitted
            .iter()
            .filter(|job| job.display_name.starts_with(label_prefix))
            .map(|job| job.requests.len())
            .sum()
    }

    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }
}

#[async_trait]
impl BatchBackend for ScriptedBackend {
    async fn create_job(
        &self,
        model: &str,
        display_name: &str,
        requests: &[GenerateRequest],
    ) -> Result<JobHandle, RemoteError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(RemoteError::Injected(format!("提交 {} 失败", display_name)));
        }

        let context = JobContext {
            model: model.to_string(),
            display_name: display_name.to_string(),
        };
        let final_state = if state.fail_jobs > 0 {
            state.fail_jobs -= 1;
            JobState::Failed
        } else {
            JobState::Succeeded
        };
        let responses = if final_state == JobState::Succeeded {
            requests
                .iter()
                .map(|request| (self.responder)(&context, request))
                .collect()
        } else {
            Vec::new()
        };

        let name = format!("batches/scripted-{}", state.submitted.len() + 1);
        state.jobs.insert(
            name.clone(),
            StoredJob {
                polls_remaining: state.polls_before_done,
                final_state,
                responses,
            },
        );
        state.submitted.push(SubmittedJob {
            name: name.clone(),
            model: context.model,
            display_name: context.display_name,
            requests: requests.to_vec(),
        });
        Ok(JobHandle { name })
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<JobSnapshot, RemoteError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.status_calls += 1;
        let job = state
            .jobs
            .get_mut(&handle.name)
            .ok_or_else(|| RemoteError::UnknownJob(handle.name.clone()))?;

        if job.polls_remaining > 0 {
            job.polls_remaining -= 1;
            return Ok(JobSnapshot {
                state: JobState::Running,
                responses: Vec::new(),
            });
        }

        Ok(JobSnapshot {
            state: job.final_state.clone(),
            responses: job.responses.clone(),
        })
    }
}
