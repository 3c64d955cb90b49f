//! 批处理应用 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责组装各组件并依次执行流水线。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、创建远程客户端和阶段执行器
//! 2. **加载目录**：扫描输入目录得到页面目录
//! 3. **精修**：委托 `RefinementController` 完成初始轮和精修轮
//! 4. **挑选**：委托 `SelectionRanker` 为每个页面挑出最佳结果
//! 5. **全局统计**：输出最终统计信息
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个页面的细节
//! - **资源所有者**：唯一持有远程后端的模块
//! - **向下委托**：精修与挑选各自由专门的组件完成

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::clients::{BatchBackend, GeminiBatchClient};
use crate::config::Config;
use crate::infrastructure::poller::{Sleeper, TokioSleeper};
use crate::models::{Catalog, ItemId};
use crate::orchestrator::refinement::{RefinementController, RefinementSummary};
use crate::services::ranker::{SelectionRanker, SelectionSummary};
use crate::services::stage_executor::StageExecutor;
use crate::utils::logging::log_catalog_loaded;

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    executor: Arc<StageExecutor>,
}

impl App {
    /// 初始化应用（连接 Gemini 批处理服务）
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        let client = GeminiBatchClient::new(&config);
        Ok(Self::assemble(config, Arc::new(client), Arc::new(TokioSleeper)))
    }

    /// 使用指定的后端初始化应用
    pub fn with_backend(
        config: Config,
        backend: Arc<dyn BatchBackend>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        config.validate_layout().context("配置校验失败")?;
        Ok(Self::assemble(config, backend, sleeper))
    }

    fn assemble(config: Config, backend: Arc<dyn BatchBackend>, sleeper: Arc<dyn Sleeper>) -> Self {
        let executor = Arc::new(StageExecutor::new(backend, sleeper, &config));
        Self {
            config: Arc::new(config),
            executor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 精修：初始轮 + 精修轮
    pub async fn run_refinement(&self) -> Result<RefinementSummary> {
        let catalog = self.load_catalog()?;
        let mut controller = RefinementController::new(self.executor.clone(), self.config.clone());
        let summary = controller
            .run(&catalog)
            .await
            .context("精修过程中止")?;

        print_refinement_stats(&summary, catalog.len());
        Ok(summary)
    }

    /// 挑选：为每个页面选出最佳结果并复制到最终目录
    pub async fn run_selection(&self) -> Result<SelectionSummary> {
        let catalog = self.load_catalog()?;
        let ranker = SelectionRanker::new(self.executor.clone(), &self.config);
        let summary = ranker.select(&catalog).await.context("挑选过程中止")?;

        print_selection_stats(&summary, &self.config);
        Ok(summary)
    }

    /// 运行完整流水线：精修后挑选
    pub async fn run(&self) -> Result<()> {
        self.run_refinement().await?;
        self.run_selection().await?;
        Ok(())
    }

    /// 加载页面目录
    fn load_catalog(&self) -> Result<Catalog> {
        info!("\n📁 正在扫描输入目录 {}...", self.config.input_dir.display());
        let catalog = Catalog::load(&self.config.input_dir)
            .with_context(|| format!("无法加载输入目录 {}", self.config.input_dir.display()))?;
        log_catalog_loaded(catalog.len());
        Ok(catalog)
    }
}

// ========== 日志辅助函数 ==========

fn print_refinement_stats(summary: &RefinementSummary, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 精修完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📂 起点轮次: {}，最后评估轮次: {}", summary.baseline, summary.last_iteration);
    info!("✅ 通过: {}/{}", summary.passed, total);
    info!("❌ 未通过: {}", summary.failed);
    if summary.early_stopped {
        info!("🎉 所有页面均已通过，提前结束");
    }
    info!("{}", "=".repeat(60));
}

fn print_selection_stats(summary: &SelectionSummary, config: &Config) {
    info!("\n{}", "=".repeat(60));
    info!("📊 挑选完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已收集: {}", summary.selections.len());
    info!(
        "🔢 模型挑选 {} / 直接选中 {} / 兜底第 1 个 {}",
        summary.ranked, summary.short_circuited, summary.fell_back
    );
    if !summary.skipped.is_empty() {
        warn!("⚠️ 没有候选的页面: {}", join_ids(&summary.skipped));
    }
    if !summary.failed.is_empty() {
        warn!("❌ 保存失败的页面: {}", join_ids(&summary.failed));
    }
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", config.final_dir.display());
    info!("来源日志: {}", config.best_log_path.display());
}

fn join_ids(ids: &[ItemId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}
