//! 单轴运行时状态
//!
//! 由控制循环独占持有，显示层只读。

use crate::setpoint::AxisSetpoints;

/// 位置显示
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionDisplay {
    /// 尚未收到有效位置
    Blank,
    Value(f64),
    /// 连续无效回复达到阈值
    Unavailable,
}

impl std::fmt::Display for PositionDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionDisplay::Blank => f.write_str("-"),
            PositionDisplay::Value(v) => write!(f, "{v:.1}"),
            PositionDisplay::Unavailable => f.write_str("N/A"),
        }
    }
}

/// 单轴运行时状态
#[derive(Debug, Clone, Default)]
pub struct AxisRuntimeState {
    pub last_valid_position_deg: Option<f64>,
    pub consecutive_invalid_responses: u32,
    pub limit_tripped: bool,
    pub enabled: bool,
    pub torque: Option<f64>,
    pub speed: Option<f64>,
    pub setpoints: AxisSetpoints,
    unavailable: bool,
}

impl AxisRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次位置回复
    ///
    /// 有效值清零计数器；无效回复累加，第 `unavailable_after` 次时
    /// 切换到不可用标记。返回 `true` 表示本次调用触发了该切换。
    pub fn record_position(&mut self, position: Option<f64>, unavailable_after: u32) -> bool {
        match position {
            Some(p) => {
                self.last_valid_position_deg = Some(p);
                self.consecutive_invalid_responses = 0;
                self.unavailable = false;
                false
            },
            None => {
                self.consecutive_invalid_responses =
                    self.consecutive_invalid_responses.saturating_add(1);
                if !self.unavailable && self.consecutive_invalid_responses >= unavailable_after {
                    self.unavailable = true;
                    true
                } else {
                    false
                }
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    /// 当前应显示的位置（不可用时不显示陈旧数值）
    pub fn position_display(&self) -> PositionDisplay {
        if self.unavailable {
            PositionDisplay::Unavailable
        } else {
            self.last_valid_position_deg
                .map(PositionDisplay::Value)
                .unwrap_or(PositionDisplay::Blank)
        }
    }
}
