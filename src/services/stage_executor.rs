//! 阶段执行器 - 业务能力层
//!
//! ## 职责
//!
//! 把一组 (页面, 请求) 按批量大小切块，逐块提交远程任务、轮询到结束、
//! 再按位置把结果解码回各个页面。
//!
//! ## 失败处理
//!
//! - 提交失败、任务非成功结束、轮询放弃：整块页面都记为未完成
//! - 任务成功但某条结果缺失、出错或解不出期望产物：只有该页面未完成
//!
//! 未完成的页面由调用方在下一轮重新计算并重试，这里从不返回错误。

use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::batch_backend::BatchBackend;
use crate::clients::wire::{GenerateRequest, InlinedResponse};
use crate::config::Config;
use crate::infrastructure::poller::{JobPoller, PollLimits, PollOutcome, Sleeper};
use crate::models::ItemId;
use crate::services::extract::{Expect, Extraction, Payload};

/// 阶段描述
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// 任务显示名前缀，如 `script-iter2`
    pub label: String,
    pub model: String,
    pub expect: Expect,
}

impl StageSpec {
    pub fn new(label: impl Into<String>, model: impl Into<String>, expect: Expect) -> Self {
        Self {
            label: label.into(),
            model: model.into(),
            expect,
        }
    }
}

/// 一个页面的请求
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub item: ItemId,
    pub request: GenerateRequest,
}

/// 阶段执行结果
#[derive(Debug, Default)]
pub struct StageReport {
    pub resolved: Vec<(ItemId, Payload)>,
    pub unresolved: Vec<ItemId>,
}

/// 阶段执行器
pub struct StageExecutor {
    backend: Arc<dyn BatchBackend>,
    poller: JobPoller,
    batch_size: usize,
}

impl StageExecutor {
    pub fn new(backend: Arc<dyn BatchBackend>, sleeper: Arc<dyn Sleeper>, config: &Config) -> Self {
        let poller = JobPoller::new(
            backend.clone(),
            sleeper,
            config.poll_interval(),
            PollLimits {
                max_polls: config.max_polls,
                max_poll_errors: config.max_poll_errors,
            },
        );
        Self {
            backend,
            poller,
            batch_size: config.batch_size.max(1),
        }
    }

    /// 执行一个阶段
    pub async fn execute(&self, stage: &StageSpec, requests: Vec<StageRequest>) -> StageReport {
        let mut report = StageReport::default();
        if requests.is_empty() {
            return report;
        }

        let (items, bodies): (Vec<ItemId>, Vec<GenerateRequest>) =
            requests.into_iter().map(|r| (r.item, r.request)).unzip();
        let total_chunks = items.len().div_ceil(self.batch_size);

        for (index, (chunk_items, chunk_bodies)) in items
            .chunks(self.batch_size)
            .zip(bodies.chunks(self.batch_size))
            .enumerate()
        {
            let display_name = format!("{}-{:03}", stage.label, index + 1);
            info!(
                "📦 [{}] 提交第 {}/{} 块，共 {} 个请求",
                stage.label,
                index + 1,
                total_chunks,
                chunk_items.len()
            );

            let handle = match self
                .backend
                .create_job(&stage.model, &display_name, chunk_bodies)
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("❌ [{}] 提交任务失败，本块页面留待重试: {}", display_name, e);
                    report.unresolved.extend(chunk_items.iter().cloned());
                    continue;
                }
            };

            match self.poller.wait(&handle).await {
                PollOutcome::Succeeded(responses) => {
                    self.collect_chunk(stage, chunk_items, responses, &mut report);
                }
                PollOutcome::Failed(_) | PollOutcome::Lost(_) => {
                    report.unresolved.extend(chunk_items.iter().cloned());
                }
            }
        }

        info!(
            "✓ [{}] 完成 {} 个，未完成 {} 个",
            stage.label,
            report.resolved.len(),
            report.unresolved.len()
        );
        report
    }

    /// 按位置把结果对应回页面
    fn collect_chunk(
        &self,
        stage: &StageSpec,
        items: &[ItemId],
        responses: Vec<InlinedResponse>,
        report: &mut StageReport,
    ) {
        if responses.len() < items.len() {
            warn!(
                "⚠️ [{}] 返回 {} 条结果，少于请求数 {}",
                stage.label,
                responses.len(),
                items.len()
            );
        }

        let mut responses = responses.into_iter();
        for item in items {
            let Some(response) = responses.next() else {
                warn!("[页面 {}] ⚠️ [{}] 缺少对应结果", item, stage.label);
                report.unresolved.push(item.clone());
                continue;
            };
            match Extraction::from_response(&response, stage.expect) {
                Extraction::Artifact(payload) => report.resolved.push((item.clone(), payload)),
                Extraction::Undecodable(reason) => {
                    warn!("[页面 {}] ⚠️ [{}] {}", item, stage.label, reason);
                    report.unresolved.push(item.clone());
                }
            }
        }
    }
}
