//! 生成流程 - 流程层
//!
//! 定义"一批页面在某一轮中"的生成流程：
//!
//! ```text
//! 脚本缓存命中？ ──是──┐
//!      │否            │
//!      ↓              ↓
//! 脚本阶段（文本） → 重绘阶段（图片） → 写入输出目录
//! ```
//!
//! 任何阶段未完成的页面都记入 `unresolved`，由上层在下一次尝试中重新计算。

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::PipelineResult;
use crate::infrastructure::artifact_store::{OutputLayout, ScriptCache};
use crate::models::{Catalog, FeedbackAccumulator, ItemId};
use crate::services::extract::{Expect, Payload};
use crate::services::prompt_builder;
use crate::services::stage_executor::{StageExecutor, StageRequest, StageSpec};
use crate::workflow::item_state::{ItemPhase, ProgressTracker};

/// 一次生成尝试的结果
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    /// 本次写入了输出的页面
    pub generated: Vec<ItemId>,
    /// 脚本或图片未能生成的页面
    pub unresolved: Vec<ItemId>,
    /// 命中脚本缓存的页面数
    pub scripts_reused: usize,
}

/// 生成流程
pub struct GenerationFlow {
    executor: Arc<StageExecutor>,
    scripts: ScriptCache,
    layout: OutputLayout,
    text_model: String,
    image_model: String,
}

impl GenerationFlow {
    pub fn new(executor: Arc<StageExecutor>, config: &Config) -> Self {
        Self {
            executor,
            scripts: ScriptCache::new(&config.scripts_dir),
            layout: OutputLayout::new(&config.output_root, &config.output_prefix),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    /// 为给定页面生成第 k 轮输出
    pub async fn run(
        &self,
        iteration: u32,
        attempt: u32,
        items: &[ItemId],
        catalog: &Catalog,
        feedback: &FeedbackAccumulator,
        tracker: &mut ProgressTracker,
    ) -> PipelineResult<RoundOutcome> {
        let mut outcome = RoundOutcome::default();

        // 1. 脚本：先读缓存，缺失的再请求
        let mut scripted: Vec<(ItemId, String)> = Vec::new();
        let mut script_requests = Vec::new();
        for id in items {
            let Some(source) = catalog.source(id) else {
                warn!("[页面 {}] 不在目录中，跳过", id);
                continue;
            };
            match self.scripts.get(id, iteration)? {
                Some(script) => scripted.push((id.clone(), script)),
                None => script_requests.push(StageRequest {
                    item: id.clone(),
                    request: prompt_builder::script_request(source, feedback.for_item(id))?,
                }),
            }
        }
        outcome.scripts_reused = scripted.len();
        if outcome.scripts_reused > 0 {
            info!("✓ 复用 {} 份已缓存的第 {} 轮脚本", outcome.scripts_reused, iteration);
        }

        if !script_requests.is_empty() {
            let stage = StageSpec::new(
                format!("script-iter{}-try{}", iteration, attempt),
                &self.text_model,
                Expect::Text,
            );
            let report = self.executor.execute(&stage, script_requests).await;
            for (id, payload) in report.resolved {
                let Payload::Text(text) = payload else {
                    outcome.unresolved.push(id);
                    continue;
                };
                let stored = self.scripts.put(&id, iteration, &text)?;
                scripted.push((id, stored));
            }
            outcome.unresolved.extend(report.unresolved);
        }

        for (id, _) in &scripted {
            tracker.advance(id, ItemPhase::Scripted);
        }

        // 2. 重绘：原图 + 脚本 → 新图
        scripted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut image_requests = Vec::with_capacity(scripted.len());
        for (id, script) in &scripted {
            let Some(source) = catalog.source(id) else {
                continue;
            };
            image_requests.push(StageRequest {
                item: id.clone(),
                request: prompt_builder::image_request(source, script, feedback.for_item(id))?,
            });
        }
        if image_requests.is_empty() {
            return Ok(outcome);
        }

        let stage = StageSpec::new(
            format!("image-iter{}-try{}", iteration, attempt),
            &self.image_model,
            Expect::Image,
        );
        let report = self.executor.execute(&stage, image_requests).await;
        for (id, payload) in report.resolved {
            let Payload::Image { mime, bytes } = payload else {
                outcome.unresolved.push(id);
                continue;
            };
            let path = self.layout.write_output(iteration, &id, &mime, &bytes)?;
            info!("[页面 {}] ✓ 已写入 {}", id, path.display());
            tracker.advance(&id, ItemPhase::Generated);
            outcome.generated.push(id);
        }
        outcome.unresolved.extend(report.unresolved);
        outcome.unresolved.sort();

        Ok(outcome)
    }
}
