//! # Servo Protocol
//!
//! 8 轴伺服控制器的文本协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `axis`: 轴标识（A-H / 1-8）
//! - `calibration`: 轴标定参数与度/脉冲换算
//! - `command`: 设备命令编码（Galil 字母轴方言 / ClearCore 数字轴方言）
//! - `response`: 回复解析（数值提取、使能状态分类）
//!
//! ## 单位
//!
//! 上层统一使用工程单位（度、度/秒），编码时按 `scaling × gearbox`
//! 换算为设备原生脉冲数。

pub mod axis;
pub mod calibration;
pub mod command;
pub mod response;

pub use axis::AxisId;
pub use calibration::{AxisCalibration, DEFAULT_POSITION_RANGE};
pub use command::{
    AxisAction, CommandDialect, CommandEncoder, DeviceCommand, PROBE_COMMAND, QUERY_PREFIXES,
    TelemetryQuery, is_query,
};
pub use response::{ACK_TOKEN, STATUS_TOLERANCE, ServoStatus, extract_numeric};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid axis: {0} (expected A-H or 1-8)")]
    InvalidAxis(String),

    #[error("Action '{action}' is not supported by the {dialect:?} dialect")]
    UnsupportedAction {
        action: &'static str,
        dialect: CommandDialect,
    },

    #[error("Non-finite value for {action}: {value}")]
    NonFiniteValue { action: &'static str, value: f64 },
}
