use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use page_refiner::clients::{GenerateRequest, InlinedResponse, ScriptedBackend};
use page_refiner::config::Config;
use page_refiner::{
    App, Catalog, ItemId, NoopSleeper, PipelineError, RefinementController, SelectionRanker,
    StageExecutor, Verdict,
};

// ========== 测试辅助 ==========

fn test_config(root: &Path) -> Config {
    Config {
        input_dir: root.join("manga"),
        output_root: root.to_path_buf(),
        scripts_dir: root.join("scripts"),
        final_dir: root.join("manga_out"),
        best_log_path: root.join("manga_best_k.tsv"),
        max_iterations: 3,
        batch_size: 2,
        poll_interval_secs: 0,
        max_stage_retries: 3,
        max_eval_retries: 2,
        max_rank_retries: 2,
        ..Config::default()
    }
}

/// 原图内容为 `src:{id}`，便于应答函数识别页面
fn write_sources(config: &Config, ids: &[&str]) {
    fs::create_dir_all(&config.input_dir).unwrap();
    for id in ids {
        fs::write(config.input_dir.join(format!("{}.png", id)), format!("src:{}", id)).unwrap();
    }
}

fn item_of(request: &GenerateRequest) -> String {
    let bytes = request
        .inline_parts()
        .next()
        .and_then(|data| data.decode().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes)
        .trim_start_matches("src:")
        .to_string()
}

fn iteration_of(display_name: &str) -> u32 {
    display_name
        .split('-')
        .find_map(|part| part.strip_prefix("iter"))
        .and_then(|k| k.parse().ok())
        .unwrap_or(0)
}

/// 评估应答
#[derive(Debug, Clone, Copy)]
enum EvalReply {
    Pass,
    Fail,
    /// 无法解析的失败响应
    Broken,
}

/// 按阶段应答的后端；`image_ok(id, k)` 决定重绘是否成功，`eval(id, k)` 决定评估应答
fn staged_backend(
    image_ok: impl Fn(&str, u32) -> bool + Send + Sync + 'static,
    eval: impl Fn(&str, u32) -> EvalReply + Send + Sync + 'static,
) -> ScriptedBackend {
    ScriptedBackend::new(move |ctx, request| {
        let item = item_of(request);
        let iteration = iteration_of(&ctx.display_name);
        let stage = ctx.display_name.split('-').next().unwrap_or_default();
        match stage {
            "script" => InlinedResponse::text(format!("script {} iter{}", item, iteration)),
            "image" if image_ok(&item, iteration) => InlinedResponse::image(
                "image/png",
                format!("img:{}:iter{}", item, iteration).as_bytes(),
            ),
            "image" => InlinedResponse::failure("safety filter"),
            "eval" => match eval(&item, iteration) {
                EvalReply::Pass => InlinedResponse::text("O\nLooks good."),
                EvalReply::Fail => {
                    InlinedResponse::text(format!("X\nFix bubble {} iter{}.", item, iteration))
                }
                EvalReply::Broken => InlinedResponse::failure("internal error"),
            },
            _ => InlinedResponse::text("BEST: 2"),
        }
    })
}

/// `pass(id, k)` 决定第 k 轮评估结果
fn pipeline_backend(pass: impl Fn(&str, u32) -> bool + Send + Sync + 'static) -> ScriptedBackend {
    staged_backend(
        |_, _| true,
        move |item, k| if pass(item, k) { EvalReply::Pass } else { EvalReply::Fail },
    )
}

/// 目录下所有文件的相对路径和内容
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                let bytes = fs::read(&path).unwrap();
                files.insert(path.strip_prefix(root).unwrap().to_path_buf(), bytes);
            }
        }
    }
    files
}

fn app(config: &Config, backend: &Arc<ScriptedBackend>) -> App {
    App::with_backend(config.clone(), backend.clone(), Arc::new(NoopSleeper)).unwrap()
}

fn controller(config: &Config, backend: &Arc<ScriptedBackend>) -> RefinementController {
    let executor = Arc::new(StageExecutor::new(
        backend.clone(),
        Arc::new(NoopSleeper),
        config,
    ));
    RefinementController::new(executor, Arc::new(config.clone()))
}

/// 某阶段中某页面的所有请求文本
fn request_texts(backend: &ScriptedBackend, label_prefix: &str, item: &str) -> Vec<String> {
    backend
        .submitted_jobs()
        .into_iter()
        .filter(|job| job.display_name.starts_with(label_prefix))
        .flat_map(|job| job.requests)
        .filter(|request| item_of(request) == item)
        .map(|request| request.texts().collect::<Vec<_>>().join("\n"))
        .collect()
}

// ========== 精修 ==========

#[tokio::test]
async fn test_refinement_carries_passes_and_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_sources(&config, &["001", "002", "003"]);

    // 002 在初始轮不通过，之后通过
    let backend = Arc::new(pipeline_backend(|item, k| !(item == "002" && k == 0)));
    let summary = app(&config, &backend).run_refinement().await.unwrap();

    assert!(summary.early_stopped);
    assert_eq!(summary.last_iteration, 1);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.failed, 0);
    assert!(!dir.path().join("out3").exists());

    // 已通过的页面原样沿用，不再生成也不再评估
    let root = dir.path();
    assert_eq!(
        fs::read(root.join("out2/001.png")).unwrap(),
        fs::read(root.join("out1/001.png")).unwrap()
    );
    assert_eq!(fs::read(root.join("out2/002.png")).unwrap(), b"img:002:iter1");
    assert_eq!(backend.request_count_for("image-iter1"), 1);
    assert_eq!(backend.request_count_for("script-iter1"), 1);
    assert_eq!(backend.request_count_for("eval-iter1"), 1);

    let log = fs::read_to_string(root.join("out2/eval_log.tsv")).unwrap();
    assert!(log.contains("1\t001\tPASS\tCarried forward unchanged from out1."));
    assert!(log.contains("1\t003\tPASS\tCarried forward unchanged from out1."));
    assert!(log.contains("1\t002\tPASS\tLooks good."));
}

#[tokio::test]
async fn test_rerun_after_completion_makes_no_remote_calls() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_iterations = 2;
    write_sources(&config, &["001", "002"]);

    let first = Arc::new(pipeline_backend(|item, _| item != "002"));
    let summary = app(&config, &first).run_refinement().await.unwrap();
    assert!(!summary.early_stopped);
    assert_eq!(summary.last_iteration, 2);
    assert!(first.job_count() > 0);

    let before = snapshot(dir.path());
    for file in ["out1/eval_log.tsv", "out3/eval_log.tsv", "out3/002.png", "scripts/002_iter2.txt"] {
        assert!(before.contains_key(Path::new(file)), "{}", file);
    }

    let second = Arc::new(pipeline_backend(|_, _| true));
    let resumed = app(&config, &second).run_refinement().await.unwrap();

    assert_eq!(second.job_count(), 0);
    assert_eq!(resumed.baseline, 2);
    assert_eq!(resumed.last_iteration, 2);
    assert_eq!(resumed.verdicts, summary.verdicts);

    // 产物、脚本和评估日志逐字节不变
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_resume_replaces_unevaluated_artifact_of_passed_item() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_stage_retries = 2;
    write_sources(&config, &["001", "002"]);
    let catalog = Catalog::load(&config.input_dir).unwrap();

    // 第一次运行：001 的评估一直失败（兜底为不通过），002 第 1 轮重绘失败导致中止
    let first = Arc::new(staged_backend(
        |item, k| !(item == "002" && k == 1),
        |item, _| if item == "001" { EvalReply::Broken } else { EvalReply::Fail },
    ));
    let err = controller(&config, &first).run(&catalog).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageExhausted { iteration: 1, .. }
    ));
    let root = dir.path();
    assert_eq!(fs::read(root.join("out1/001.png")).unwrap(), b"img:001:iter0");
    assert_eq!(fs::read(root.join("out2/001.png")).unwrap(), b"img:001:iter1");
    assert!(!root.join("out2/002.png").exists());

    // 第二次运行：001 在初始轮重新评估为通过，out2 中未评估的产物被替换
    let second = Arc::new(pipeline_backend(|_, _| true));
    let summary = controller(&config, &second).run(&catalog).await.unwrap();

    assert_eq!(summary.baseline, 0);
    assert_eq!(summary.passed, 2);
    assert_eq!(second.request_count_for("eval-iter0"), 1);
    assert_eq!(second.request_count_for("image-iter1"), 1);
    assert_eq!(
        fs::read(root.join("out2/001.png")).unwrap(),
        fs::read(root.join("out1/001.png")).unwrap()
    );
    let log = fs::read_to_string(root.join("out2/eval_log.tsv")).unwrap();
    assert!(log.contains("1\t001\tPASS\tCarried forward unchanged from out1."));
}

#[tokio::test]
async fn test_exhausted_evaluation_falls_back_without_logging() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_iterations = 1;
    write_sources(&config, &["001", "002"]);

    let backend = Arc::new(staged_backend(
        |_, _| true,
        |item, _| if item == "001" { EvalReply::Broken } else { EvalReply::Pass },
    ));
    let summary = app(&config, &backend).run_refinement().await.unwrap();

    assert_eq!(summary.verdicts[&ItemId::new("001")], Verdict::Fail);
    assert_eq!(summary.verdicts[&ItemId::new("002")], Verdict::Pass);
    assert_eq!(summary.last_iteration, 1);
    // 每轮评估都重试到上限
    assert_eq!(backend.request_count_for("eval-iter0-try1"), 2);
    assert_eq!(backend.request_count_for("eval-iter0-try2"), 1);

    // 兜底判定不写日志
    for folder in ["out1", "out2"] {
        let log = fs::read_to_string(dir.path().join(folder).join("eval_log.tsv")).unwrap();
        assert!(log.contains("\t002\tPASS\t"), "{}", folder);
        assert!(!log.contains("\t001\t"), "{}", folder);
    }

    // 兜底意见进入下一轮的生成请求
    for stage in ["script-iter1", "image-iter1"] {
        let texts = request_texts(&backend, stage, "001");
        assert_eq!(texts.len(), 1, "{}", stage);
        assert!(texts[0].contains("- Evaluation failed 2 times; keeping the previous verdict."));
    }
}

#[tokio::test]
async fn test_feedback_accumulates_across_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_iterations = 2;
    write_sources(&config, &["001", "002"]);

    let backend = Arc::new(pipeline_backend(|item, _| item != "002"));
    let summary = app(&config, &backend).run_refinement().await.unwrap();
    assert_eq!(summary.failed, 1);

    let initial = request_texts(&backend, "image-iter0", "002");
    assert!(initial.iter().all(|text| !text.contains("Fix bubble")));

    for stage in ["script-iter2", "image-iter2"] {
        let texts = request_texts(&backend, stage, "002");
        assert_eq!(texts.len(), 1, "{}", stage);
        let text = &texts[0];
        let first = text.find("- Fix bubble 002 iter0.").unwrap();
        let second = text.find("- Fix bubble 002 iter1.").unwrap();
        assert!(first < second);
    }
}

#[tokio::test]
async fn test_stage_exhaustion_names_stuck_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_stage_retries = 2;
    write_sources(&config, &["001", "002", "003"]);

    let backend = Arc::new(ScriptedBackend::new(|ctx, request| {
        let item = item_of(request);
        if ctx.display_name.starts_with("image") && item == "003" {
            return InlinedResponse::failure("safety filter");
        }
        if ctx.display_name.starts_with("image") {
            InlinedResponse::image("image/png", item.as_bytes())
        } else {
            InlinedResponse::text("script")
        }
    }));
    let catalog = Catalog::load(&config.input_dir).unwrap();
    let err = controller(&config, &backend).run(&catalog).await.unwrap_err();

    match err {
        PipelineError::StageExhausted {
            iteration,
            attempts,
            items,
        } => {
            assert_eq!(iteration, 0);
            assert_eq!(attempts, 2);
            assert_eq!(items, vec![ItemId::new("003")]);
        }
        other => panic!("unexpected error: {}", other),
    }

    // 已完成的页面留在磁盘上，脚本不会重复请求
    assert!(dir.path().join("out1/001.png").exists());
    assert!(dir.path().join("out1/002.png").exists());
    assert_eq!(backend.request_count_for("script-iter0-try2"), 0);
    assert_eq!(backend.request_count_for("image-iter0-try2"), 1);
}

#[tokio::test]
async fn test_failed_job_items_are_regenerated_next_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_iterations = 0;
    write_sources(&config, &["001", "002", "003"]);

    let backend = Arc::new(pipeline_backend(|_, _| true).with_polls_before_done(1));
    // 第一个脚本任务（001、002）以 FAILED 结束
    backend.fail_next_jobs(1);

    let summary = app(&config, &backend).run_refinement().await.unwrap();

    assert_eq!(summary.passed, 3);
    assert_eq!(backend.request_count_for("script-iter0-try1"), 3);
    assert_eq!(backend.request_count_for("image-iter0-try1"), 1);
    assert_eq!(backend.request_count_for("script-iter0-try2"), 2);
    assert_eq!(backend.request_count_for("image-iter0-try2"), 2);
    assert!(backend.status_calls() > backend.job_count());
    for id in ["001", "002", "003"] {
        assert!(dir.path().join(format!("out1/{}.png", id)).exists());
    }
}

#[tokio::test]
async fn test_existing_script_is_not_requested_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_iterations = 0;
    write_sources(&config, &["001", "002"]);
    fs::create_dir_all(&config.scripts_dir).unwrap();
    fs::write(config.scripts_dir.join("001_iter0.txt"), "cached script").unwrap();

    let backend = Arc::new(pipeline_backend(|_, _| true));
    app(&config, &backend).run_refinement().await.unwrap();

    assert_eq!(backend.request_count_for("script-iter0"), 1);
    assert!(request_texts(&backend, "script-iter0", "001").is_empty());
    let image = request_texts(&backend, "image-iter0", "001");
    assert!(image[0].ends_with("cached script"));
    assert_eq!(
        fs::read_to_string(config.scripts_dir.join("002_iter0.txt")).unwrap(),
        "script 002 iter0"
    );
}

#[tokio::test]
async fn test_cached_verdicts_skip_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_sources(&config, &["001", "002"]);

    let out1 = dir.path().join("out1");
    fs::create_dir_all(&out1).unwrap();
    fs::write(out1.join("001.png"), "img:001").unwrap();
    fs::write(out1.join("002.jpg"), "img:002").unwrap();
    fs::write(
        out1.join("eval_log.tsv"),
        "iteration\titem_id\tverdict\tcritique\n0\t001\tPASS\tok\n0\t002\tO\tlegacy token\n",
    )
    .unwrap();

    let backend = Arc::new(pipeline_backend(|_, _| false));
    let summary = app(&config, &backend).run_refinement().await.unwrap();

    assert_eq!(backend.job_count(), 0);
    assert!(summary.early_stopped);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.last_iteration, 0);
}

// ========== 挑选 ==========

fn write_candidate(root: &Path, folder: &str, file: &str) {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), format!("{}/{}", folder, file)).unwrap();
}

#[tokio::test]
async fn test_selection_uses_ranked_candidate_and_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_sources(&config, &["001", "002"]);
    write_candidate(dir.path(), "out1", "001.png");
    write_candidate(dir.path(), "out2", "001.jpg");
    write_candidate(dir.path(), "out1", "002.png");

    let backend = Arc::new(pipeline_backend(|_, _| true));
    let summary = app(&config, &backend).run_selection().await.unwrap();

    assert_eq!(summary.ranked, 1);
    assert_eq!(summary.short_circuited, 1);
    assert_eq!(summary.fell_back, 0);
    assert_eq!(backend.request_count_for("rank"), 1);

    let final_dir = &config.final_dir;
    assert_eq!(fs::read_to_string(final_dir.join("001.jpg")).unwrap(), "out2/001.jpg");
    assert_eq!(fs::read_to_string(final_dir.join("002.png")).unwrap(), "out1/002.png");

    let log = fs::read_to_string(&config.best_log_path).unwrap();
    assert!(log.starts_with("item_id\tbest_index\tcandidate_folder\tcandidate_filename\n"));
    assert!(log.contains("001\t2\tout2\t001.jpg\n"));
    assert!(log.contains("002\t1\tout1\t002.png\n"));
}

#[tokio::test]
async fn test_selection_falls_back_to_first_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_sources(&config, &["001"]);
    for folder in ["out1", "out2", "out10"] {
        write_candidate(dir.path(), folder, "001.png");
    }

    let backend = Arc::new(ScriptedBackend::new(|_, _| {
        InlinedResponse::text("They all look fine to me.")
    }));
    let summary = app(&config, &backend).run_selection().await.unwrap();

    assert_eq!(summary.fell_back, 1);
    assert_eq!(backend.request_count_for("rank-try"), 2);
    // 候选按目录序号排列：out1、out2、out10
    let texts = request_texts(&backend, "rank-try1", "001");
    assert!(texts[0].contains("<CANDIDATE_3>"));
    assert_eq!(
        fs::read_to_string(config.final_dir.join("001.png")).unwrap(),
        "out1/001.png"
    );
}

#[tokio::test]
async fn test_selection_without_output_folders_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_sources(&config, &["001"]);

    let backend = Arc::new(pipeline_backend(|_, _| true));
    let executor = Arc::new(StageExecutor::new(
        backend.clone(),
        Arc::new(NoopSleeper),
        &config,
    ));
    let catalog = Catalog::load(&config.input_dir).unwrap();
    let err = SelectionRanker::new(executor, &config)
        .select(&catalog)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoOutputFolders(_)));
    assert_eq!(backend.job_count(), 0);
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_live_full_pipeline() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = Config::from_env();
    let app = App::initialize(config).expect("初始化失败");
    app.run().await.expect("流水线运行失败");
}
