use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use page_refiner::utils::logging::log_startup;
use page_refiner::{logger, App, Config};

#[derive(Parser)]
#[command(name = "page_refiner")]
#[command(version, about = "漫画页面批量翻译与精修流水线")]
struct Cli {
    /// TOML 配置文件，未提供时只读取环境变量
    #[arg(short, long, global = true, env = "PAGE_REFINER_CONFIG")]
    config: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// 初始翻译 + 精修，直到全部通过或轮次用尽
    Refine,
    /// 从所有输出目录中为每页挑选最佳结果
    Select,
    /// 先精修再挑选
    Run,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Refine => "精修模式",
            Command::Select => "挑选模式",
            Command::Run => "完整流水线",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("无法加载配置文件 {}", path.display()))?,
        None => Config::from_env(),
    };
    config.verbose_logging |= cli.verbose;

    // 初始化日志
    logger::init(config.verbose_logging);
    log_startup(cli.command.name(), &config);

    // 初始化并运行应用
    let app = App::initialize(config)?;
    match cli.command {
        Command::Refine => {
            app.run_refinement().await?;
        }
        Command::Select => {
            app.run_selection().await?;
        }
        Command::Run => app.run().await?,
    }

    Ok(())
}
