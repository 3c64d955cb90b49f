use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置
///
/// 构造后不可变，以 `Arc<Config>` 传给各组件。
/// 测试里可以用很小的批量和零间隔轮询。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 目录 ---
    /// 原始页面目录
    pub input_dir: PathBuf,
    /// 输出目录的父目录（out1、out2 ... 都在这里）
    pub output_root: PathBuf,
    /// 输出目录名前缀
    pub output_prefix: String,
    /// 每页每轮的翻译脚本目录
    pub scripts_dir: PathBuf,
    /// 最终挑选结果目录
    pub final_dir: PathBuf,
    /// 最终挑选来源日志
    pub best_log_path: PathBuf,

    // --- 批处理 ---
    /// 最大精修轮数（不含初始轮）
    pub max_iterations: u32,
    /// 每个远程任务最多包含的请求数
    pub batch_size: usize,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 单个任务最多轮询次数，None 表示不限
    pub max_polls: Option<u32>,
    /// 连续轮询出错多少次后放弃该任务
    pub max_poll_errors: u32,
    /// 生成阶段最大重试轮数（超过即终止运行）
    pub max_stage_retries: u32,
    /// 评估最大重试次数
    pub max_eval_retries: u32,
    /// 挑选最大重试次数
    pub max_rank_retries: u32,

    // --- 远程服务 ---
    pub api_key: String,
    pub api_base_url: String,
    /// 文本模型（脚本、评估、挑选）
    pub text_model: String,
    /// 图像模型（页面重绘）
    pub image_model: String,

    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("manga"),
            output_root: PathBuf::from("."),
            output_prefix: "out".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            final_dir: PathBuf::from("manga_out"),
            best_log_path: PathBuf::from("manga_best_k.tsv"),
            max_iterations: 5,
            batch_size: 1000,
            poll_interval_secs: 30,
            max_polls: None,
            max_poll_errors: 5,
            max_stage_retries: 10,
            max_eval_retries: 5,
            max_rank_retries: 3,
            api_key: String::new(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            text_model: "models/gemini-3-pro-preview".to_string(),
            image_model: "models/gemini-3-pro-image-preview".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从环境变量读取配置，缺失或无法解析的项使用默认值
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// 从 TOML 文件读取配置，文件中没有的项使用默认值，之后再叠加环境变量
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config.overlay_env())
    }

    fn overlay_env(self) -> Self {
        let api_key = env_string("PAGE_REFINER_API_KEY")
            .or_else(|| env_string("GEMINI_API_KEY"))
            .or_else(|| env_string("GOOGLE_API_KEY"))
            .unwrap_or(self.api_key);

        Self {
            input_dir: env_string("INPUT_DIR").map(PathBuf::from).unwrap_or(self.input_dir),
            output_root: env_string("OUTPUT_ROOT").map(PathBuf::from).unwrap_or(self.output_root),
            output_prefix: env_string("OUTPUT_PREFIX").unwrap_or(self.output_prefix),
            scripts_dir: env_string("SCRIPTS_DIR").map(PathBuf::from).unwrap_or(self.scripts_dir),
            final_dir: env_string("FINAL_DIR").map(PathBuf::from).unwrap_or(self.final_dir),
            best_log_path: env_string("BEST_LOG_PATH").map(PathBuf::from).unwrap_or(self.best_log_path),
            max_iterations: env_parse("MAX_ITERATIONS").unwrap_or(self.max_iterations),
            batch_size: env_parse("BATCH_SIZE").unwrap_or(self.batch_size),
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS").unwrap_or(self.poll_interval_secs),
            max_polls: env_parse("MAX_POLLS").map(Some).unwrap_or(self.max_polls),
            max_poll_errors: env_parse("MAX_POLL_ERRORS").unwrap_or(self.max_poll_errors),
            max_stage_retries: env_parse("MAX_STAGE_RETRIES").unwrap_or(self.max_stage_retries),
            max_eval_retries: env_parse("MAX_EVAL_RETRIES").unwrap_or(self.max_eval_retries),
            max_rank_retries: env_parse("MAX_RANK_RETRIES").unwrap_or(self.max_rank_retries),
            api_key,
            api_base_url: env_string("API_BASE_URL").unwrap_or(self.api_base_url),
            text_model: env_string("TEXT_MODEL").unwrap_or(self.text_model),
            image_model: env_string("IMAGE_MODEL").unwrap_or(self.image_model),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
        }
    }

    /// 检查配置是否可用于远程调用
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_layout()?;
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    /// 检查与远程服务无关的配置项
    pub fn validate_layout(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "必须大于 0".to_string(),
            });
        }
        if self.output_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "output_prefix",
                reason: "不能为空".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.max_polls, None);
        assert_eq!(config.text_model, "models/gemini-3-pro-preview");
    }

    #[test]
    fn test_toml_partial_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refiner.toml");
        std::fs::write(&path, "batch_size = 4\npoll_interval_secs = 0\nmax_iterations = 2\n")
            .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.poll_interval(), Duration::ZERO);
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.max_rank_retries, 3);
        assert_eq!(config.output_prefix, "out");
    }

    #[test]
    fn test_toml_parse_error_carries_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "batch_size = \"many\"").unwrap();

        match Config::from_toml_file(&path) {
            Err(ConfigError::TomlParseFailed { path: p, .. }) => assert_eq!(p, path),
            other => panic!("期望 TomlParseFailed，实际: {:?}", other),
        }
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = Config {
            api_key: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate_layout().is_ok());
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config {
            batch_size: 0,
            api_key: "key".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "batch_size", .. })
        ));
    }
}
