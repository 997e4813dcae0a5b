//! # Servo CLI
//!
//! 8 轴伺服控制器操作台。
//!
//! ## 交互模式（推荐）
//!
//! ```bash
//! $ servo-cli shell
//! servo[A]> set speed 20
//! servo[A]> ok speed
//! servo[A]> jog +
//! servo[A]> release
//! servo[A]> quit
//! ```
//!
//! ## One-shot 模式（脚本）
//!
//! ```bash
//! servo-cli send B abs 90 --yes
//! servo-cli monitor --axis C --cycles 20
//! servo-cli probe
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod modes;
mod parse;
mod utils;

use commands::{ConfigCommand, MonitorCommand, SendCommand};

/// Servo CLI - 伺服控制器操作台
#[derive(Parser, Debug)]
#[command(name = "servo-cli")]
#[command(about = "Operator console for 8-axis servo motion controllers", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（默认：$SERVO_CONSOLE_CONFIG 或用户配置目录）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 同时把日志写入文件
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 启动交互式 Shell
    Shell,

    /// 向单个轴发送一条命令
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 持续打印某个轴的遥测
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 连接检查（读取控制器版本）
    Probe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config(cmd) => cmd.execute(config_path),

        Commands::Shell => {
            let config = commands::config::load(config_path)?;
            let shutdown = install_interrupt_flag()?;
            modes::shell::run_shell(&config, &shutdown)
        },

        Commands::Send { args } => {
            let config = commands::config::load(config_path)?;
            args.execute(&config)
        },

        Commands::Monitor { args } => {
            let config = commands::config::load(config_path)?;
            let shutdown = install_interrupt_flag()?;
            args.execute(&config, &shutdown)
        },

        Commands::Probe => {
            let config = commands::config::load(config_path)?;
            commands::probe::execute(&config)
        },
    }
}

/// 初始化日志：`RUST_LOG` 优先，默认 `servo_cli=info`
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("servo_cli=info".parse()?)
        .add_directive("servo_control=warn".parse()?);

    match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("打开日志文件失败: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        },
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        },
    }
    Ok(())
}

/// Ctrl+C 只置位停止标志，由控制循环负责有序退出
fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 收到 Ctrl+C，正在停止...");
        flag.store(true, Ordering::Release);
    })
    .context("安装 Ctrl+C 处理器失败")?;
    Ok(shutdown)
}
