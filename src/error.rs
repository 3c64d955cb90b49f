use std::path::PathBuf;

use thiserror::Error;

use crate::models::ItemId;

/// 流水线顶层错误
///
/// 运行期间唯一的硬性终止是生成阶段重试耗尽（`StageExhausted`）。
/// 远程异常（`RemoteError`）都在批次粒度上被吸收并重试，不会出现在这里。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 输入目录不存在
    #[error("输入目录不存在: {}", .0.display())]
    InputDirMissing(PathBuf),
    /// 输入目录中没有可处理的图片
    #[error("输入目录中没有图片: {}", .0.display())]
    EmptyCatalog(PathBuf),
    /// 生成阶段重试耗尽
    #[error(
        "第 {iteration} 轮在 {attempts} 次尝试后仍有 {} 个页面无法生成: {}",
        .items.len(),
        join_ids(.items)
    )]
    StageExhausted {
        iteration: u32,
        attempts: u32,
        items: Vec<ItemId>,
    },
    /// 找不到任何输出目录（挑选阶段）
    #[error("在 {} 下没有找到任何输出目录", .0.display())]
    NoOutputFolders(PathBuf),
}

/// 远程调用错误（创建任务 / 轮询状态）
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// 服务返回非成功状态码
    #[error("服务返回错误响应 ({endpoint}): status={status}, body={body}")]
    BadResponse {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// 响应 JSON 解析失败
    #[error("JSON解析失败 ({endpoint}): {source}")]
    JsonParseFailed {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    /// 创建任务的响应里没有任务名
    #[error("创建任务的响应中缺少任务名 ({endpoint})")]
    MissingJobName { endpoint: String },
    /// 未知任务（测试后端或服务端已清理）
    #[error("未知任务: {0}")]
    UnknownJob(String),
    /// 注入的故障（测试后端）
    #[error("模拟故障: {0}")]
    Injected(String),
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({}): {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({}): {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 复制文件失败
    #[error("复制文件失败 ({} -> {}): {source}", .from.display(), .to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 读取目录失败
    #[error("读取目录失败 ({}): {source}", .path.display())]
    ListFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 没有找到 API Key
    #[error("未找到 API Key，请设置 PAGE_REFINER_API_KEY / GEMINI_API_KEY / GOOGLE_API_KEY")]
    MissingApiKey,
    /// 数值配置非法
    #[error("配置项 {field} 的值非法: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({}): {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", .path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl FileError {
    /// 创建文件读取错误
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::ReadFailed {
            path: path.into(),
            source,
        }
    }

    /// 创建文件写入错误
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// 创建目录读取错误
    pub fn list(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::ListFailed {
            path: path.into(),
            source,
        }
    }
}

impl RemoteError {
    /// 创建网络请求错误
    pub fn request_failed(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        RemoteError::RequestFailed {
            endpoint: endpoint.into(),
            source,
        }
    }
}

fn join_ids(items: &[ItemId]) -> String {
    items
        .iter()
        .map(ItemId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// ========== Result 类型别名 ==========

/// 流水线结果类型
pub type PipelineResult<T> = Result<T, PipelineError>;
