/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use tracing::info;

use crate::config::Config;

/// 记录程序启动信息
///
/// # 参数
/// - `command`: 本次执行的子命令
/// - `config`: 程序配置
pub fn log_startup(command: &str, config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {}", command);
    info!(
        "启动时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("📁 输入目录: {}", config.input_dir.display());
    info!(
        "📁 输出目录: {}/{}N",
        config.output_root.display(),
        config.output_prefix
    );
    info!(
        "📊 最大轮数: {}，每批最多 {} 个请求",
        config.max_iterations, config.batch_size
    );
    info!("{}", "=".repeat(60));
}

/// 记录页面加载信息
pub fn log_catalog_loaded(total: usize) {
    info!("✓ 找到 {} 个待处理的页面\n", total);
}

/// 记录一轮开始
///
/// # 参数
/// - `iteration`: 轮次（0 为初始轮）
/// - `folder`: 本轮输出目录名
/// - `max_iterations`: 最大精修轮数
pub fn log_iteration_start(iteration: u32, folder: &str, max_iterations: u32) {
    info!("\n{}", "=".repeat(60));
    if iteration == 0 {
        info!("📦 初始翻译 → {}", folder);
    } else {
        info!("📦 第 {}/{} 轮精修 → {}", iteration, max_iterations, folder);
    }
    info!("{}", "=".repeat(60));
}

/// 记录一轮完成
pub fn log_iteration_complete(iteration: u32, passed: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 轮完成: 通过 {}/{}", iteration, passed, total);
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
