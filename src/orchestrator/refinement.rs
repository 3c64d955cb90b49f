//! 精修控制器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责整个精修过程，是轮次级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **初始轮**：为 `{prefix}1` 中缺失的页面生成产物
//! 2. **断点恢复**：找到最近一个连续完整的轮次作为起点，并重放评估重建累计意见
//! 3. **精修轮**：沿用已通过的页面，只为未通过的页面重新生成
//! 4. **严格完整**：生成阶段重试耗尽仍有缺失时终止运行
//! 5. **提前结束**：所有页面都通过时停止

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::artifact_store::OutputLayout;
use crate::models::{Catalog, EvaluationRecord, ItemId, Verdict};
use crate::services::evaluation::EvaluationAccumulator;
use crate::services::stage_executor::StageExecutor;
use crate::utils::logging::{log_iteration_complete, log_iteration_start};
use crate::workflow::generation::GenerationFlow;
use crate::workflow::item_state::{ItemPhase, ProgressTracker};

/// 精修结果统计
#[derive(Debug, Clone, Default)]
pub struct RefinementSummary {
    /// 恢复运行时的起点轮次
    pub baseline: u32,
    /// 最后一个完成评估的轮次
    pub last_iteration: u32,
    pub passed: usize,
    pub failed: usize,
    /// 是否因全部通过而提前结束
    pub early_stopped: bool,
    /// 每个页面最终的判定
    pub verdicts: BTreeMap<ItemId, Verdict>,
}

/// 精修控制器
pub struct RefinementController {
    layout: OutputLayout,
    generation: GenerationFlow,
    evaluation: EvaluationAccumulator,
    max_iterations: u32,
    max_stage_retries: u32,
}

impl RefinementController {
    pub fn new(executor: Arc<StageExecutor>, config: Arc<Config>) -> Self {
        Self {
            layout: OutputLayout::new(&config.output_root, &config.output_prefix),
            generation: GenerationFlow::new(executor.clone(), &config),
            evaluation: EvaluationAccumulator::new(executor, &config),
            max_iterations: config.max_iterations,
            max_stage_retries: config.max_stage_retries.max(1),
        }
    }

    /// 运行精修，直到全部通过或轮次用尽
    pub async fn run(&mut self, catalog: &Catalog) -> PipelineResult<RefinementSummary> {
        let mut tracker = ProgressTracker::new(catalog.ids());

        // ========== 初始轮 ==========
        log_iteration_start(0, &self.layout.folder_name(0), self.max_iterations);
        self.generate_until_complete(0, catalog, &mut tracker).await?;

        // ========== 断点恢复 ==========
        let baseline = self.layout.last_complete_iteration(catalog, self.max_iterations)?;
        if baseline > 0 {
            info!(
                "📂 发现已完成的精修轮次，从第 {} 轮之后继续（{}）",
                baseline,
                self.layout.folder_name(baseline)
            );
        }

        // 依次评估 0..=baseline，重建最新判定和累计意见
        for k in 0..=baseline {
            let evaluation = self.evaluation.evaluate_folder(k, catalog).await?;
            for record in &evaluation.records {
                tracker.restore(&record.item, ItemPhase::from_verdict(record.verdict));
            }
        }

        let mut summary = RefinementSummary {
            baseline,
            last_iteration: baseline,
            ..Default::default()
        };

        if self.evaluation.all_passed(catalog) {
            info!("🎉 所有页面均已通过，无需精修");
            summary.early_stopped = true;
            return Ok(self.finish(summary, catalog));
        }

        // ========== 精修轮 ==========
        for k in baseline + 1..=self.max_iterations {
            log_iteration_start(k, &self.layout.folder_name(k), self.max_iterations);
            tracker.begin_iteration();

            self.carry_forward(k, catalog, &mut tracker)?;
            self.generate_until_complete(k, catalog, &mut tracker).await?;

            let evaluation = self.evaluation.evaluate_folder(k, catalog).await?;
            apply_verdicts(&mut tracker, &evaluation.records);
            summary.last_iteration = k;

            log_iteration_complete(k, tracker.count(ItemPhase::Passed), catalog.len());

            if self.evaluation.all_passed(catalog) {
                info!("🎉 第 {} 轮后所有页面均已通过，提前结束", k);
                summary.early_stopped = true;
                break;
            }
        }

        Ok(self.finish(summary, catalog))
    }

    /// 把已通过的页面原样复制到第 k 轮，并写入沿用记录
    fn carry_forward(
        &self,
        iteration: u32,
        catalog: &Catalog,
        tracker: &mut ProgressTracker,
    ) -> PipelineResult<()> {
        let passed: Vec<ItemId> = catalog
            .ids()
            .filter(|id| self.evaluation.verdict(id).is_some_and(Verdict::is_pass))
            .cloned()
            .collect();
        if passed.is_empty() {
            return Ok(());
        }

        let mut carried = Vec::with_capacity(passed.len());
        for id in passed {
            match self.layout.copy_forward(iteration, &id)? {
                Some(_) => carried.push(id),
                None => {
                    warn!("[页面 {}] ⚠️ 上一轮缺少已通过的产物，本轮重新生成", id);
                    tracker.restore(&id, ItemPhase::Pending);
                }
            }
        }

        let written = self.evaluation.record_carried_forward(iteration, &carried)?;
        info!(
            "✓ 沿用 {} 个已通过页面（新写入 {} 条通过记录）",
            carried.len(),
            written
        );
        Ok(())
    }

    /// 反复生成第 k 轮缺失的产物，直到目录完整或重试耗尽
    async fn generate_until_complete(
        &self,
        iteration: u32,
        catalog: &Catalog,
        tracker: &mut ProgressTracker,
    ) -> PipelineResult<()> {
        for attempt in 1..=self.max_stage_retries {
            let missing = self.missing_items(iteration, catalog)?;
            if missing.is_empty() {
                info!("✓ {} 已完整", self.layout.folder_name(iteration));
                return Ok(());
            }
            info!(
                "🔄 生成尝试 {}/{}，待生成 {} 个页面",
                attempt,
                self.max_stage_retries,
                missing.len()
            );

            let outcome = self
                .generation
                .run(
                    iteration,
                    attempt,
                    &missing,
                    catalog,
                    self.evaluation.feedback(),
                    tracker,
                )
                .await?;
            info!("✓ 本次写入 {} 个页面", outcome.generated.len());
            if !outcome.unresolved.is_empty() {
                warn!(
                    "⚠️ 本次尝试有 {} 个页面未完成，将重新计算后重试",
                    outcome.unresolved.len()
                );
            }
        }

        let missing = self.missing_items(iteration, catalog)?;
        if missing.is_empty() {
            info!("✓ {} 已完整", self.layout.folder_name(iteration));
            return Ok(());
        }
        Err(PipelineError::StageExhausted {
            iteration,
            attempts: self.max_stage_retries,
            items: missing,
        })
    }

    /// 第 k 轮目录中还没有产物的页面
    fn missing_items(&self, iteration: u32, catalog: &Catalog) -> PipelineResult<Vec<ItemId>> {
        let existing = self.layout.existing_ids(iteration)?;
        Ok(catalog
            .ids()
            .filter(|id| !existing.contains(*id))
            .cloned()
            .collect())
    }

    fn finish(&self, mut summary: RefinementSummary, catalog: &Catalog) -> RefinementSummary {
        summary.verdicts = catalog
            .ids()
            .filter_map(|id| self.evaluation.verdict(id).map(|v| (id.clone(), v)))
            .collect();
        summary.passed = summary.verdicts.values().filter(|v| v.is_pass()).count();
        summary.failed = catalog.len() - summary.passed;
        summary
    }
}

/// 本轮生成的页面按判定推进，其余按记录直接设置
fn apply_verdicts(tracker: &mut ProgressTracker, records: &[EvaluationRecord]) {
    for record in records {
        let next = ItemPhase::from_verdict(record.verdict);
        if tracker.phase(&record.item) == Some(ItemPhase::Generated) {
            tracker.advance(&record.item, next);
        } else {
            tracker.restore(&record.item, next);
        }
    }
}
