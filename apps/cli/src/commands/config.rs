//! 配置管理命令
//!
//! 查找顺序：`--config`，`$SERVO_CONSOLE_CONFIG`，`<配置目录>/servo-console/config.toml`

use crate::utils::describe_transport;
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use servo_control::ConsoleConfig;
use servo_protocol::AxisId;
use std::fs;
use std::path::{Path, PathBuf};

/// 指定配置文件的环境变量
pub const CONFIG_ENV: &str = "SERVO_CONSOLE_CONFIG";

/// 默认配置模板（8 轴，直连）
pub const TEMPLATE: &str = r#"# Servo Console Configuration

[controller]
type = "direct"          # direct | serial | datagram
# dialect = "galil"      # galil | clearcore

[direct]
address = "192.168.1.2"
timeout_ms = 1000

[serial]
port = "/dev/ttyUSB0"
baudrate = 115200
timeout = 0.1

[datagram]
remote = "192.168.1.151:8888"
local = "0.0.0.0:8889"

[polling]
period_ms = 200
unavailable_after = 5

[limits]
max_speed = 360.0
max_accel = 3600.0
max_decel = 3600.0
creep_back_fraction = 0.1

[axes.A]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.B]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.C]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.D]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.E]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.F]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.G]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4

[axes.H]
min = 0.0
max = 180.0
pulses = 10000
degrees = 360
scaling = 500
gearbox = 4
"#;

/// 解析配置文件路径
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("servo-console");
    path.push("config.toml");
    Ok(path)
}

/// 加载并校验配置
pub fn load(explicit: Option<&Path>) -> Result<ConsoleConfig> {
    let path = resolve_path(explicit)?;
    if !path.exists() {
        bail!(
            "配置文件不存在: {}（使用 'servo-cli config init' 生成模板）",
            path.display()
        );
    }
    ConsoleConfig::load(&path).with_context(|| format!("加载配置失败: {}", path.display()))
}

/// 写出配置模板
fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("配置文件已存在: {}（使用 --force 覆盖）", path.display());
    }
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).context("创建配置目录失败")?;
    }
    fs::write(path, TEMPLATE).context("写入配置文件失败")?;
    Ok(())
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 加载并校验配置，打印各轴标定
    Check,

    /// 打印配置文件路径
    Path,

    /// 生成配置模板
    Init {
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self, explicit: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Check => Self::check_(explicit),

            ConfigCommand::Path => {
                println!("{}", resolve_path(explicit)?.display());
                Ok(())
            },

            ConfigCommand::Init { force } => {
                let path = resolve_path(explicit)?;
                write_template(&path, force)?;
                println!("✅ 已生成配置模板: {}", path.display());
                Ok(())
            },
        }
    }

    fn check_(explicit: Option<&Path>) -> Result<()> {
        let path = resolve_path(explicit)?;
        let config = load(explicit)?;

        println!("配置文件: {}", path.display());
        println!("  传输: {}", describe_transport(&config.transport));
        println!("  方言: {:?}", config.dialect);
        println!(
            "  轮询: {} ms，连续 {} 次无效回复后标记不可用",
            config.polling.period_ms, config.polling.unavailable_after
        );
        println!(
            "  上限: 速度 {} °/s，加速度 {}，减速度 {}，回退比例 {}",
            config.limits.max_speed,
            config.limits.max_accel,
            config.limits.max_decel,
            config.limits.creep_back_fraction
        );
        println!();
        println!("  轴   最小(°)   最大(°)   脉冲/度");
        for axis in AxisId::all() {
            let cal = config.calibration(axis);
            println!(
                "  {}  {:>8.1}  {:>8.1}  {:>9.1}",
                axis,
                cal.min_degrees,
                cal.max_degrees,
                cal.pulses_per_degree()
            );
        }
        println!();
        println!("✅ 配置有效");
        Ok(())
    }
}
