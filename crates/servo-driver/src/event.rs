//! 控制台事件

use servo_protocol::AxisId;

/// 一个轮询周期的遥测结果
///
/// 任一字段在重试预算内没有得到有效数值时为 `None`（协议噪声下属正常情况）。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryEvent {
    pub axis: AxisId,
    /// 位置（度）
    pub position_deg: Option<f64>,
    /// 位置查询的原始回复
    pub raw_position_reply: Option<String>,
    pub torque: Option<f64>,
    /// 使能状态原始值（0.0 = 使能，1.0 = 断使能）
    pub status: Option<f64>,
    /// 实际速度
    pub speed: Option<f64>,
}

impl TelemetryEvent {
    /// 全部字段缺失的事件
    pub fn absent(axis: AxisId) -> Self {
        Self {
            axis,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.position_deg.is_none()
            && self.torque.is_none()
            && self.status.is_none()
            && self.speed.is_none()
    }
}

/// 点动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JogDirection {
    Positive,
    Negative,
}

impl JogDirection {
    pub fn sign(self) -> f64 {
        match self {
            JogDirection::Positive => 1.0,
            JogDirection::Negative => -1.0,
        }
    }
}

/// 控制循环唯一的输入事件类型
///
/// `Op` 为操作员命令类型，由上层定义。
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent<Op> {
    Telemetry(TelemetryEvent),
    JogPressed { axis: AxisId, direction: JogDirection },
    JogReleased { axis: AxisId },
    Operator(Op),
    /// 请求控制循环退出
    Shutdown,
}

impl<Op> From<TelemetryEvent> for ConsoleEvent<Op> {
    fn from(event: TelemetryEvent) -> Self {
        ConsoleEvent::Telemetry(event)
    }
}
