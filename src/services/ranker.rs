//! 最佳结果挑选 - 业务能力层
//!
//! ## 职责
//!
//! 1. **候选收集**：扫描所有 `{prefix}{n}` 输出目录，按 n 升序为每个页面收集候选
//! 2. **短路**：只有一个候选的页面直接选中，不发请求
//! 3. **多选一**：两个及以上候选时请模型回答 `BEST: k`，失败重试，耗尽后选第 1 个
//! 4. **收集与留痕**：把选中的文件复制到最终目录，并在来源日志中追加一行

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FileError, PipelineError, PipelineResult};
use crate::infrastructure::artifact_store::{copy_atomic, OutputLayout};
use crate::models::{BestSelection, Candidate, Catalog, ItemId};
use crate::services::extract::{Expect, Payload};
use crate::services::prompt_builder;
use crate::services::stage_executor::{StageExecutor, StageRequest, StageSpec};
use crate::utils::logging::truncate_text;

const BEST_LOG_HEADER: &str = "item_id\tbest_index\tcandidate_folder\tcandidate_filename";

/// 解析挑选结果，返回从 1 开始的候选序号
///
/// 只看第一行非空文本：有 `BEST: k` 时以它为准，k 越界即失败；
/// 没有时取第一个正整数，同样必须在 1..=n 之内。
pub fn parse_best_index(text: &str, candidates: usize) -> Option<usize> {
    static BEST_RE: OnceLock<Regex> = OnceLock::new();
    static BARE_RE: OnceLock<Regex> = OnceLock::new();

    let first = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let in_range = |k: usize| (1..=candidates).contains(&k).then_some(k);

    let best_re = BEST_RE.get_or_init(|| Regex::new(r"(?i)BEST\s*:\s*(\d+)").expect("正则有效"));
    if let Some(caps) = best_re.captures(first) {
        return caps.get(1)?.as_str().parse().ok().and_then(in_range);
    }

    let bare_re = BARE_RE.get_or_init(|| Regex::new(r"\b([1-9]\d*)\b").expect("正则有效"));
    let caps = bare_re.captures(first)?;
    caps.get(1)?.as_str().parse().ok().and_then(in_range)
}

// ========== 来源日志 ==========

/// 最终挑选的来源日志（只追加）
#[derive(Debug, Clone)]
pub struct SelectionLog {
    path: PathBuf,
}

impl SelectionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, selection: &BestSelection) -> Result<(), FileError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
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
            line.push_str(BEST_LOG_HEADER);
            line.push('\n');
        }
        line.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            selection.item, selection.index, selection.folder, selection.file_name
        ));
        file.write_all(line.as_bytes())
            .map_err(|e| FileError::write(&self.path, e))
    }
}

// ========== 挑选器 ==========

/// 挑选统计
#[derive(Debug, Clone, Default)]
pub struct SelectionSummary {
    pub selections: Vec<BestSelection>,
    /// 由模型选出的页面数
    pub ranked: usize,
    /// 只有一个候选直接选中的页面数
    pub short_circuited: usize,
    /// 重试耗尽后退回第 1 个候选的页面数
    pub fell_back: usize,
    /// 没有任何候选的页面
    pub skipped: Vec<ItemId>,
    /// 复制失败的页面
    pub failed: Vec<ItemId>,
}

/// 最佳结果挑选器
pub struct SelectionRanker {
    executor: Arc<StageExecutor>,
    layout: OutputLayout,
    output_root: PathBuf,
    final_dir: PathBuf,
    log: SelectionLog,
    model: String,
    max_retries: u32,
}

impl SelectionRanker {
    pub fn new(executor: Arc<StageExecutor>, config: &Config) -> Self {
        Self {
            executor,
            layout: OutputLayout::new(&config.output_root, &config.output_prefix),
            output_root: config.output_root.clone(),
            final_dir: config.final_dir.clone(),
            log: SelectionLog::new(&config.best_log_path),
            model: config.text_model.clone(),
            max_retries: config.max_rank_retries.max(1),
        }
    }

    /// 为每个页面按目录顺序收集候选
    pub fn collect_candidates(
        &self,
        catalog: &Catalog,
    ) -> PipelineResult<BTreeMap<ItemId, Vec<Candidate>>> {
        let folders = self.layout.discover_iteration_folders()?;
        if folders.is_empty() {
            return Err(PipelineError::NoOutputFolders(self.output_root.clone()));
        }

        let mut indices = Vec::with_capacity(folders.len());
        for (_, path) in &folders {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let index = OutputLayout::index_dir(path)?;
            info!("📁 {} 中有 {} 张图片", name, index.len());
            indices.push((name, index));
        }

        let mut candidates = BTreeMap::new();
        for id in catalog.ids() {
            let found: Vec<Candidate> = indices
                .iter()
                .filter_map(|(folder, index)| {
                    index.get(id).map(|path| Candidate {
                        folder: folder.clone(),
                        path: path.clone(),
                    })
                })
                .collect();
            candidates.insert(id.clone(), found);
        }
        Ok(candidates)
    }

    /// 为目录中的每个页面挑选最佳结果
    pub async fn select(&self, catalog: &Catalog) -> PipelineResult<SelectionSummary> {
        let all_candidates = self.collect_candidates(catalog)?;
        let mut summary = SelectionSummary::default();
        let mut to_rank: Vec<(&ItemId, &Vec<Candidate>)> = Vec::new();

        for (id, candidates) in &all_candidates {
            match candidates.len() {
                0 => {
                    warn!("[页面 {}] ⚠️ 没有任何候选，跳过", id);
                    summary.skipped.push(id.clone());
                }
                1 => {
                    info!("[页面 {}] 只有 1 个候选，直接选中", id);
                    summary.short_circuited += 1;
                    self.finalize(id, candidates, 1, &mut summary);
                }
                _ => to_rank.push((id, candidates)),
            }
        }

        info!("\n📊 需要模型挑选的页面: {} 个", to_rank.len());
        let best = self.rank(catalog, &to_rank).await?;

        for (id, candidates) in to_rank {
            let index = match best.get(id) {
                Some(index) => {
                    summary.ranked += 1;
                    *index
                }
                None => {
                    warn!(
                        "[页面 {}] ⚠️ 挑选 {} 次均失败，使用第 1 个候选",
                        id, self.max_retries
                    );
                    summary.fell_back += 1;
                    1
                }
            };
            self.finalize(id, candidates, index, &mut summary);
        }

        Ok(summary)
    }

    /// 多候选页面的模型挑选，返回成功解析的页面 → 序号
    async fn rank(
        &self,
        catalog: &Catalog,
        to_rank: &[(&ItemId, &Vec<Candidate>)],
    ) -> PipelineResult<BTreeMap<ItemId, usize>> {
        let mut best: BTreeMap<ItemId, usize> = BTreeMap::new();

        for attempt in 1..=self.max_retries {
            let pending: Vec<&(&ItemId, &Vec<Candidate>)> = to_rank
                .iter()
                .filter(|(id, _)| !best.contains_key(*id))
                .collect();
            if pending.is_empty() {
                break;
            }
            info!(
                "🔄 挑选尝试 {}/{}，待挑选 {} 个页面",
                attempt,
                self.max_retries,
                pending.len()
            );

            let mut requests = Vec::with_capacity(pending.len());
            let mut counts = BTreeMap::new();
            for (id, candidates) in pending {
                let Some(source) = catalog.source(id) else {
                    continue;
                };
                requests.push(StageRequest {
                    item: (*id).clone(),
                    request: prompt_builder::rank_request(source, candidates)?,
                });
                counts.insert((*id).clone(), candidates.len());
            }

            let stage = StageSpec::new(format!("rank-try{}", attempt), &self.model, Expect::Text);
            let report = self.executor.execute(&stage, requests).await;

            for (id, payload) in report.resolved {
                let Payload::Text(text) = payload else {
                    continue;
                };
                let n = counts.get(&id).copied().unwrap_or(0);
                match parse_best_index(&text, n) {
                    Some(index) => {
                        info!("[页面 {}] ✓ BEST = {}（第 {} 次尝试）", id, index, attempt);
                        best.insert(id, index);
                    }
                    None => {
                        warn!(
                            "[页面 {}] ⚠️ 无法解析挑选结果: {}",
                            id,
                            truncate_text(first_line(&text), 80)
                        );
                    }
                }
            }
        }

        Ok(best)
    }

    /// 复制选中的候选并写来源日志；失败时再尝试第 1 个候选
    fn finalize(
        &self,
        id: &ItemId,
        candidates: &[Candidate],
        index: usize,
        summary: &mut SelectionSummary,
    ) {
        let index = index.clamp(1, candidates.len().max(1));
        let mut attempts = vec![index];
        if index != 1 {
            attempts.push(1);
        }

        for index in attempts {
            let Some(candidate) = candidates.get(index - 1) else {
                continue;
            };
            match self.collect(id, candidate, index) {
                Ok(selection) => {
                    info!(
                        "[页面 {}] ✓ 选中第 {} 个候选（{}/{}）",
                        id, index, selection.folder, selection.file_name
                    );
                    summary.selections.push(selection);
                    return;
                }
                Err(e) => warn!("[页面 {}] ❌ 保存第 {} 个候选失败: {}", id, index, e),
            }
        }
        summary.failed.push(id.clone());
    }

    fn collect(
        &self,
        id: &ItemId,
        candidate: &Candidate,
        index: usize,
    ) -> Result<BestSelection, FileError> {
        let target = self
            .final_dir
            .join(format!("{}.{}", id, extension_of(&candidate.path)));
        copy_atomic(&candidate.path, &target)?;

        let selection = BestSelection {
            item: id.clone(),
            index,
            folder: candidate.folder.clone(),
            file_name: candidate.file_name(),
        };
        self.log.append(&selection)?;
        Ok(selection)
    }
}

/// 候选文件的扩展名（小写），没有时按 png
fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "png".to_string())
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_best_index_explicit() {
        assert_eq!(parse_best_index("BEST: 2", 3), Some(2));
        assert_eq!(parse_best_index("\n  best:3\nbecause...", 3), Some(3));
        assert_eq!(parse_best_index("Best : 1 (cleanest)", 2), Some(1));
    }

    #[test]
    fn test_parse_best_index_out_of_range_fails() {
        assert_eq!(parse_best_index("BEST: 4", 3), None);
        // BEST 越界时不再退回到裸数字
        assert_eq!(parse_best_index("BEST: 0, maybe 2", 3), None);
    }

    #[test]
    fn test_parse_best_index_bare_integer_fallback() {
        assert_eq!(parse_best_index("Candidate 2 is best", 3), Some(2));
        assert_eq!(parse_best_index("I pick 7", 3), None);
        assert_eq!(parse_best_index("none of them", 3), None);
        assert_eq!(parse_best_index("", 3), None);
    }

    #[test]
    fn test_selection_log_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.tsv");
        let log = SelectionLog::new(&path);
        for index in [1, 2] {
            log.append(&BestSelection {
                item: ItemId::new("9"),
                index,
                folder: format!("out{}", index),
                file_name: "9.png".to_string(),
            })
            .unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "item_id\tbest_index\tcandidate_folder\tcandidate_filename\n9\t1\tout1\t9.png\n9\t2\tout2\t9.png\n"
        );
    }
}
