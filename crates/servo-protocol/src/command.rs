//! 设备命令编码
//!
//! 把（轴，动作，工程单位值）映射为设备原生命令字符串。编码是纯函数，
//! 不依赖任何运行时状态。

use crate::{AxisCalibration, AxisId, ProtocolError};
use std::fmt;

/// 连接探测命令（读取控制器固件版本号）
pub const PROBE_COMMAND: &str = "MG _BN";

/// 同步返回回复的查询命令前缀
pub const QUERY_PREFIXES: [&str; 9] = ["MG", "TP", "RP", "QR", "QA", "QZ", "QM", "QH", "QX"];

/// 判断命令是否为查询类命令（忽略前导空白与大小写）
pub fn is_query(command: &str) -> bool {
    let head = command.trim_start();
    QUERY_PREFIXES.iter().any(|prefix| {
        head.get(..prefix.len())
            .is_some_and(|h| h.eq_ignore_ascii_case(prefix))
    })
}

/// 命令方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CommandDialect {
    /// 字母轴（A-H）两字母指令集，用于直连与串口
    #[default]
    Galil,
    /// 数字轴（1-8）关键字指令集，用于 UDP 数据报
    ClearCore,
}

/// 轴动作（值均为工程单位）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisAction {
    Enable,
    Disable,
    Start,
    Stop,
    /// 点动，速度单位 度/秒，符号表示方向
    Jog { speed_deg_s: f64 },
    SetSpeed(f64),
    SetAccel(f64),
    SetDecel(f64),
    SetAbsolutePosition(f64),
    SetRelativePosition(f64),
    /// 将当前位置置零（仅 Galil 方言）
    ZeroPosition,
}

impl AxisAction {
    /// 动作名称（用于日志与错误信息）
    pub fn name(&self) -> &'static str {
        match self {
            AxisAction::Enable => "enable",
            AxisAction::Disable => "disable",
            AxisAction::Start => "start",
            AxisAction::Stop => "stop",
            AxisAction::Jog { .. } => "jog",
            AxisAction::SetSpeed(_) => "set speed",
            AxisAction::SetAccel(_) => "set accel",
            AxisAction::SetDecel(_) => "set decel",
            AxisAction::SetAbsolutePosition(_) => "set absolute position",
            AxisAction::SetRelativePosition(_) => "set relative position",
            AxisAction::ZeroPosition => "zero position",
        }
    }

    /// 携带的工程单位值（无值动作返回 None）
    pub fn value(&self) -> Option<f64> {
        match *self {
            AxisAction::Jog { speed_deg_s } => Some(speed_deg_s),
            AxisAction::SetSpeed(v)
            | AxisAction::SetAccel(v)
            | AxisAction::SetDecel(v)
            | AxisAction::SetAbsolutePosition(v)
            | AxisAction::SetRelativePosition(v) => Some(v),
            _ => None,
        }
    }
}

/// 已编码的设备命令
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceCommand(String);

impl DeviceCommand {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// 是否为同步返回的查询命令
    pub fn is_query(&self) -> bool {
        is_query(&self.0)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceCommand {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 命令编码器
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandEncoder {
    dialect: CommandDialect,
}

impl CommandEncoder {
    pub fn new(dialect: CommandDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> CommandDialect {
        self.dialect
    }

    /// 编码一个轴动作
    ///
    /// 带值动作先按 `round(value × scaling × gearbox)` 换算为脉冲。
    ///
    /// # 错误
    ///
    /// - 值为 NaN 或无穷：`NonFiniteValue`
    /// - ClearCore 方言下的置零：`UnsupportedAction`
    pub fn encode(
        &self,
        axis: AxisId,
        action: &AxisAction,
        calibration: &AxisCalibration,
    ) -> Result<DeviceCommand, ProtocolError> {
        let pulses = match action.value() {
            Some(v) if !v.is_finite() => {
                return Err(ProtocolError::NonFiniteValue {
                    action: action.name(),
                    value: v,
                });
            },
            Some(v) => calibration.to_pulses(v),
            None => 0,
        };

        let raw = match self.dialect {
            CommandDialect::Galil => Self::encode_galil(axis.letter(), action, pulses),
            CommandDialect::ClearCore => {
                Self::encode_clearcore(axis.number(), action, pulses).ok_or(
                    ProtocolError::UnsupportedAction {
                        action: action.name(),
                        dialect: self.dialect,
                    },
                )?
            },
        };
        Ok(DeviceCommand(raw))
    }

    fn encode_galil(l: char, action: &AxisAction, pulses: i64) -> String {
        match action {
            AxisAction::Enable => format!("SH{l}"),
            AxisAction::Disable => format!("MO{l}"),
            AxisAction::Start => format!("BG{l}"),
            AxisAction::Stop => format!("ST{l}"),
            AxisAction::Jog { .. } => format!("JG{l}={pulses};BG{l}"),
            AxisAction::SetSpeed(_) => format!("SP{l}={pulses}"),
            AxisAction::SetAccel(_) => format!("AC{l}={pulses}"),
            AxisAction::SetDecel(_) => format!("DC{l}={pulses}"),
            AxisAction::SetAbsolutePosition(_) => format!("PA{l}={pulses}"),
            AxisAction::SetRelativePosition(_) => format!("PR{l}={pulses}"),
            AxisAction::ZeroPosition => {
                // 8 个槽位，只填写目标轴
                let slot = (l as u8 - b'A') as usize;
                let slots: Vec<&str> = (0..AxisId::COUNT)
                    .map(|i| if i == slot { "0" } else { "" })
                    .collect();
                format!("DP {}", slots.join(","))
            },
        }
    }

    fn encode_clearcore(n: u8, action: &AxisAction, pulses: i64) -> Option<String> {
        let raw = match action {
            AxisAction::Enable => format!("ENABLE_SERVO_{n}"),
            AxisAction::Disable => format!("DISABLE_SERVO_{n}"),
            AxisAction::Start => format!("START_MOTION_{n}"),
            AxisAction::Stop => format!("STOP_MOTION_{n}"),
            AxisAction::Jog { .. } => format!("JOG_SERVO_{n}_{pulses}"),
            AxisAction::SetSpeed(_) => format!("SET_SPEED_{n}_{pulses}"),
            AxisAction::SetAccel(_) => format!("SET_ACCEL_{n}_{pulses}"),
            AxisAction::SetDecel(_) => format!("SET_DECEL_{n}_{pulses}"),
            AxisAction::SetAbsolutePosition(_) => format!("SET_ABS_POS_{n}_{pulses}"),
            AxisAction::SetRelativePosition(_) => format!("SET_REL_POS_{n}_{pulses}"),
            AxisAction::ZeroPosition => return None,
        };
        Some(raw)
    }
}

/// 遥测查询项
///
/// 两种方言均使用 `MG _xx<轴字母>` 形式查询。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryQuery {
    Position,
    Torque,
    Status,
    Speed,
}

impl TelemetryQuery {
    /// 每个轮询周期的查询顺序
    pub const CYCLE: [TelemetryQuery; 4] = [
        TelemetryQuery::Position,
        TelemetryQuery::Torque,
        TelemetryQuery::Status,
        TelemetryQuery::Speed,
    ];

    pub fn command(self, axis: AxisId) -> DeviceCommand {
        let l = axis.letter();
        let raw = match self {
            TelemetryQuery::Position => format!("MG _RP{l}"),
            TelemetryQuery::Torque => format!("MG _TC{l}"),
            TelemetryQuery::Status => format!("MG _MO{l}"),
            TelemetryQuery::Speed => format!("MG _SPE{l}"),
        };
        DeviceCommand(raw)
    }
}
