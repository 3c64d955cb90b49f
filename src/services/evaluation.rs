//! 评估累加器 - 业务能力层
//!
//! ## 职责
//!
//! 1. **逐目录评估**：对某一轮输出目录中的页面发起 "原图 vs 译图" 判定
//! 2. **判定缓存**：目录下的 `eval_log.tsv` 已有记录的页面不再请求
//! 3. **事件日志**：每得到一条模型判定立即追加写入
//! 4. **跨轮累计**：保存每个页面最新的判定，以及所有失败意见
//!
//! 评估重试耗尽的页面沿用上一轮判定（没有则记为失败），这类兜底记录不写日志，
//! 下次运行会重新评估。

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FileError, PipelineResult};
use crate::infrastructure::artifact_store::OutputLayout;
use crate::models::{Catalog, EvaluationRecord, FeedbackAccumulator, ItemId, RecordOrigin, Verdict};
use crate::services::extract::{Expect, Payload};
use crate::services::prompt_builder;
use crate::services::prompts::DEFAULT_CRITIQUE;
use crate::services::stage_executor::{StageExecutor, StageRequest, StageSpec};

/// 每个输出目录中的评估日志文件名
pub const EVAL_LOG_FILE: &str = "eval_log.tsv";

const EVAL_LOG_HEADER: &str = "iteration\titem_id\tverdict\tcritique";

/// 解析评估文本
///
/// 第一行非空文本中第一个出现的 `O`（通过）或 `X`（失败）决定判定，不区分大小写，
/// 都没有时记为失败。其余非空行去掉首尾空白后用换行连接作为意见，
/// 意见为空时使用默认意见。
pub fn parse_evaluation(text: &str) -> (Verdict, String) {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(first) = lines.next() else {
        return (Verdict::Fail, DEFAULT_CRITIQUE.to_string());
    };

    let verdict = first
        .chars()
        .find_map(|c| match c.to_ascii_uppercase() {
            'O' => Some(Verdict::Pass),
            'X' => Some(Verdict::Fail),
            _ => None,
        })
        .unwrap_or(Verdict::Fail);

    let critique = lines.collect::<Vec<_>>().join("\n");
    if critique.is_empty() {
        (verdict, DEFAULT_CRITIQUE.to_string())
    } else {
        (verdict, critique)
    }
}

// ========== 判定缓存 ==========

/// 某个目录已落盘的判定（页面 → 判定, 意见）
///
/// 同一页面出现多条记录时以第一条为准。
#[derive(Debug, Default)]
pub struct VerdictCache {
    entries: BTreeMap<ItemId, (Verdict, String)>,
}

impl VerdictCache {
    /// 读取日志；文件不存在时为空缓存，格式不对的行跳过
    pub fn load(path: &Path) -> Result<Self, FileError> {
        let mut cache = Self::default();
        if !path.is_file() {
            return Ok(cache);
        }

        let content = fs::read_to_string(path).map_err(|e| FileError::read(path, e))?;
        for line in content.lines() {
            if line.is_empty() || line.starts_with("iteration\t") {
                continue;
            }
            let fields: Vec<&str> = line.splitn(4, '\t').collect();
            let [_, item, verdict, critique] = fields.as_slice() else {
                debug!("跳过格式不正确的评估记录: {}", line);
                continue;
            };
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            cache
                .entries
                .entry(ItemId::new(item))
                .or_insert_with(|| (Verdict::from_token(verdict), critique.to_string()));
        }
        Ok(cache)
    }

    pub fn get(&self, item: &ItemId) -> Option<&(Verdict, String)> {
        self.entries.get(item)
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.entries.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ========== 事件日志 ==========

/// 追加写入的评估日志
#[derive(Debug, Clone)]
pub struct EvaluationLog {
    path: PathBuf,
}

impl EvaluationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 追加一条记录，文件不存在或为空时先写表头
    ///
    /// 兜底记录不写入，返回值表示是否写入。
    pub fn append(&self, record: &EvaluationRecord) -> Result<bool, FileError> {
        if !record.is_persistent() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| FileError::write(parent, e))?;
        }
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FileError::write(&self.path, e))?;

        let mut line = String::new();
        if needs_header {
            line.push_str(EVAL_LOG_HEADER);
            line.push('\n');
        }
        line.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            record.iteration,
            sanitize_field(record.item.as_str()),
            record.verdict.token(),
            sanitize_field(&record.critique)
        ));
        file.write_all(line.as_bytes())
            .map_err(|e| FileError::write(&self.path, e))?;
        Ok(true)
    }
}

/// 日志字段中的制表符和换行替换为空格
fn sanitize_field(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}

// ========== 评估累加器 ==========

/// 一个目录的评估结果
#[derive(Debug, Clone, Default)]
pub struct FolderEvaluation {
    pub iteration: u32,
    /// 按页面自然顺序
    pub records: Vec<EvaluationRecord>,
    /// 命中缓存的页面数
    pub cached: usize,
    /// 本次由模型判定的页面数
    pub evaluated: usize,
    /// 重试耗尽后兜底的页面数
    pub fallback: usize,
}

impl FolderEvaluation {
    pub fn pass_count(&self) -> usize {
        self.records.iter().filter(|r| r.verdict.is_pass()).count()
    }

    pub fn fail_count(&self) -> usize {
        self.records.len() - self.pass_count()
    }
}

/// 评估累加器
pub struct EvaluationAccumulator {
    executor: Arc<StageExecutor>,
    layout: OutputLayout,
    model: String,
    max_retries: u32,
    latest: BTreeMap<ItemId, Verdict>,
    feedback: FeedbackAccumulator,
}

impl EvaluationAccumulator {
    pub fn new(executor: Arc<StageExecutor>, config: &Config) -> Self {
        Self {
            executor,
            layout: OutputLayout::new(&config.output_root, &config.output_prefix),
            model: config.text_model.clone(),
            max_retries: config.max_eval_retries.max(1),
            latest: BTreeMap::new(),
            feedback: FeedbackAccumulator::new(),
        }
    }

    pub fn log_path(&self, iteration: u32) -> PathBuf {
        self.layout.folder(iteration).join(EVAL_LOG_FILE)
    }

    pub fn verdict(&self, item: &ItemId) -> Option<Verdict> {
        self.latest.get(item).copied()
    }

    pub fn feedback(&self) -> &FeedbackAccumulator {
        &self.feedback
    }

    /// 目录中每个页面的最新判定都是通过
    pub fn all_passed(&self, catalog: &Catalog) -> bool {
        !catalog.is_empty()
            && catalog
                .ids()
                .all(|id| self.verdict(id).map(Verdict::is_pass).unwrap_or(false))
    }

    /// 为沿用到第 k 轮的已通过页面写入通过记录（已有记录的跳过）
    pub fn record_carried_forward(
        &self,
        iteration: u32,
        items: &[ItemId],
    ) -> Result<usize, FileError> {
        let log_path = self.log_path(iteration);
        let cache = VerdictCache::load(&log_path)?;
        let log = EvaluationLog::new(log_path);
        let source = iteration
            .checked_sub(1)
            .map(|prev| self.layout.folder_name(prev))
            .unwrap_or_default();

        let mut written = 0;
        for item in items.iter().filter(|item| !cache.contains(item)) {
            let record = EvaluationRecord::new(
                iteration,
                item.clone(),
                Verdict::Pass,
                format!("Carried forward unchanged from {}.", source),
                RecordOrigin::CarriedForward,
            );
            if log.append(&record)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// 评估第 k 轮目录
    pub async fn evaluate_folder(
        &mut self,
        iteration: u32,
        catalog: &Catalog,
    ) -> PipelineResult<FolderEvaluation> {
        let folder = self.layout.folder(iteration);
        info!("\n🔍 评估目录 {}（第 {} 轮）", folder.display(), iteration);

        let outputs = self.layout.index(iteration)?;
        let targets: Vec<(ItemId, PathBuf, PathBuf)> = catalog
            .ids()
            .filter_map(|id| {
                let source = catalog.source(id)?;
                let output = outputs.get(id)?;
                Some((id.clone(), source.to_path_buf(), output.clone()))
            })
            .collect();

        let mut evaluation = FolderEvaluation {
            iteration,
            ..Default::default()
        };
        if targets.is_empty() {
            warn!("⚠️ {} 中没有可评估的页面", folder.display());
            return Ok(evaluation);
        }

        let log_path = self.log_path(iteration);
        let cache = VerdictCache::load(&log_path)?;
        let log = EvaluationLog::new(log_path);

        let mut results: BTreeMap<ItemId, EvaluationRecord> = BTreeMap::new();
        for (id, _, _) in &targets {
            if let Some((verdict, critique)) = cache.get(id) {
                results.insert(
                    id.clone(),
                    EvaluationRecord::new(iteration, id.clone(), *verdict, critique.clone(), RecordOrigin::Model),
                );
            }
        }
        evaluation.cached = results.len();
        if evaluation.cached > 0 {
            info!("✓ 命中评估缓存 {} 个页面", evaluation.cached);
        }

        for attempt in 1..=self.max_retries {
            let pending: Vec<&(ItemId, PathBuf, PathBuf)> = targets
                .iter()
                .filter(|(id, _, _)| !results.contains_key(id))
                .collect();
            if pending.is_empty() {
                break;
            }
            info!(
                "🔄 评估尝试 {}/{}，待评估 {} 个页面",
                attempt,
                self.max_retries,
                pending.len()
            );

            let mut requests = Vec::with_capacity(pending.len());
            for (id, source, output) in pending {
                requests.push(StageRequest {
                    item: id.clone(),
                    request: prompt_builder::eval_request(source, output)?,
                });
            }

            let stage = StageSpec::new(
                format!("eval-iter{}-try{}", iteration, attempt),
                &self.model,
                Expect::Text,
            );
            let report = self.executor.execute(&stage, requests).await;

            for (id, payload) in report.resolved {
                let Payload::Text(text) = payload else {
                    continue;
                };
                let (verdict, critique) = parse_evaluation(&text);
                let record =
                    EvaluationRecord::new(iteration, id.clone(), verdict, critique, RecordOrigin::Model);
                log.append(&record)?;
                debug!("[页面 {}] 判定 {}", id, verdict);
                evaluation.evaluated += 1;
                results.insert(id, record);
            }
        }

        for (id, _, _) in &targets {
            if results.contains_key(id) {
                continue;
            }
            let previous = self.verdict(id).unwrap_or(Verdict::Fail);
            warn!(
                "[页面 {}] ⚠️ 评估 {} 次均失败，沿用上一轮判定 {}",
                id, self.max_retries, previous
            );
            let record = EvaluationRecord::new(
                iteration,
                id.clone(),
                previous,
                format!(
                    "Evaluation failed {} times; keeping the previous verdict. {}",
                    self.max_retries, DEFAULT_CRITIQUE
                ),
                RecordOrigin::Fallback,
            );
            log.append(&record)?;
            evaluation.fallback += 1;
            results.insert(id.clone(), record);
        }

        for record in results.into_values() {
            self.apply(&record);
            evaluation.records.push(record);
        }

        info!(
            "✓ 第 {} 轮评估完成: 通过 {} / 失败 {}（缓存 {}，新评估 {}，兜底 {}）",
            iteration,
            evaluation.pass_count(),
            evaluation.fail_count(),
            evaluation.cached,
            evaluation.evaluated,
            evaluation.fallback
        );
        Ok(evaluation)
    }

    /// 更新最新判定；失败记录的意见加入累计意见
    fn apply(&mut self, record: &EvaluationRecord) {
        self.latest.insert(record.item.clone(), record.verdict);
        if !record.verdict.is_pass() {
            self.feedback.push(&record.item, &record.critique);
        }
    }
}
