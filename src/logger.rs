//! 日志初始化
//!
//! 程序启动时调用一次 [`init`]。设置了 `RUST_LOG` 时以它为准，
//! 否则默认 `info`，`--verbose` 时为 `debug`。

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// 安装全局 tracing 订阅器，重复调用时忽略
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
}
