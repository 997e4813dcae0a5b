//! 设定值确认状态机
//!
//! 每个（轴，字段）独立一台状态机：
//!
//! ```text
//! Idle ──edit──▶ PendingEdit ──request──▶ AwaitingConfirmation ──sent──▶ Idle
//!                    ▲                          │
//!                    │                        failed
//!                    │                          ▼
//!                    └──────── request ──── Failed
//! ```
//!
//! 任意非 Idle 状态都可以取消，回到上一次确认的值（没有则为空）。
//! 本模块只管理状态，编码与发送由会话完成。

use crate::config::MotionLimits;
use servo_protocol::{AxisAction, AxisCalibration};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 设定值字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetpointField {
    Speed,
    Accel,
    Decel,
    AbsolutePosition,
    RelativePosition,
}

impl SetpointField {
    pub const ALL: [SetpointField; 5] = [
        SetpointField::Speed,
        SetpointField::Accel,
        SetpointField::Decel,
        SetpointField::AbsolutePosition,
        SetpointField::RelativePosition,
    ];

    fn index(self) -> usize {
        match self {
            SetpointField::Speed => 0,
            SetpointField::Accel => 1,
            SetpointField::Decel => 2,
            SetpointField::AbsolutePosition => 3,
            SetpointField::RelativePosition => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SetpointField::Speed => "speed",
            SetpointField::Accel => "accel",
            SetpointField::Decel => "decel",
            SetpointField::AbsolutePosition => "abs",
            SetpointField::RelativePosition => "rel",
        }
    }

    /// 对应的设备动作
    pub fn action(self, value: f64) -> AxisAction {
        match self {
            SetpointField::Speed => AxisAction::SetSpeed(value),
            SetpointField::Accel => AxisAction::SetAccel(value),
            SetpointField::Decel => AxisAction::SetDecel(value),
            SetpointField::AbsolutePosition => AxisAction::SetAbsolutePosition(value),
            SetpointField::RelativePosition => AxisAction::SetRelativePosition(value),
        }
    }
}

impl fmt::Display for SetpointField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SetpointField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" | "sp" => Ok(SetpointField::Speed),
            "accel" | "ac" => Ok(SetpointField::Accel),
            "decel" | "dc" => Ok(SetpointField::Decel),
            "abs" | "pa" | "absolute" => Ok(SetpointField::AbsolutePosition),
            "rel" | "pr" | "relative" => Ok(SetpointField::RelativePosition),
            other => Err(format!(
                "unknown field '{other}' (expected speed, accel, decel, abs or rel)"
            )),
        }
    }
}

/// 字段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetpointPhase {
    #[default]
    Idle,
    PendingEdit,
    AwaitingConfirmation,
    /// 发送失败，等待操作员显式重试
    Failed,
}

/// 设定值校验失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetpointError {
    #[error("No value entered for {0}")]
    MissingValue(SetpointField),

    #[error("'{text}' is not a number ({field})")]
    NotNumeric { field: SetpointField, text: String },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: SetpointField,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Relative move to {target:.1} from {current:.1} leaves [{min}, {max}]")]
    RelativeTargetOutOfRange {
        current: f64,
        target: f64,
        min: f64,
        max: f64,
    },

    #[error("Current position is unknown, relative move refused")]
    PositionUnknown,

    #[error("{field} is not awaiting confirmation")]
    NotAwaitingConfirmation { field: SetpointField },
}

/// 单字段状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    text: String,
    /// 操作员输入的原值（未截断）
    entered: Option<f64>,
    /// 截断到范围并保留一位小数后的值
    pending: Option<f64>,
    confirmed: Option<f64>,
    phase: SetpointPhase,
}

impl FieldState {
    pub fn phase(&self) -> SetpointPhase {
        self.phase
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    pub fn last_confirmed(&self) -> Option<f64> {
        self.confirmed
    }

    /// 界面上应显示的值
    pub fn display_value(&self) -> Option<f64> {
        match self.phase {
            SetpointPhase::Idle => self.confirmed,
            _ => self.pending,
        }
    }

    /// 是否显示“待确认”高亮
    pub fn is_highlighted(&self) -> bool {
        self.phase != SetpointPhase::Idle
    }

    fn restore(&mut self) {
        self.entered = self.confirmed;
        self.pending = self.confirmed;
        self.text = self.confirmed.map(|v| format!("{v:.1}")).unwrap_or_default();
        self.phase = SetpointPhase::Idle;
    }
}

/// 一个轴的全部设定值字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSetpoints {
    fields: [FieldState; 5],
}

impl AxisSetpoints {
    pub fn field(&self, field: SetpointField) -> &FieldState {
        &self.fields[field.index()]
    }

    fn field_mut(&mut self, field: SetpointField) -> &mut FieldState {
        &mut self.fields[field.index()]
    }

    /// 点动使用的速度：未确认的输入优先
    pub fn live_speed(&self) -> Option<f64> {
        let speed = self.field(SetpointField::Speed);
        speed.pending.or(speed.confirmed)
    }
}

/// 待确认请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationRequest {
    pub field: SetpointField,
    pub value: f64,
    /// 相对移动时的当前位置与目标位置
    pub current_position: Option<f64>,
    pub target_position: Option<f64>,
}

/// 确认结果
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    /// 已编码并发送，值成为新的确认值
    Sent { value: f64, reply: Option<String> },
    /// 操作员拒绝，字段恢复到上一次确认的值
    Declined { restored: Option<f64> },
}

/// 设定值控制器（绑定一个轴的标定与全局运动上限）
#[derive(Debug, Clone, Copy)]
pub struct SetpointController<'a> {
    calibration: &'a AxisCalibration,
    limits: &'a MotionLimits,
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl<'a> SetpointController<'a> {
    pub fn new(calibration: &'a AxisCalibration, limits: &'a MotionLimits) -> Self {
        Self {
            calibration,
            limits,
        }
    }

    /// 字段的允许范围
    pub fn range(&self, field: SetpointField) -> (f64, f64) {
        match field {
            SetpointField::Speed => (0.0, self.limits.max_speed),
            SetpointField::Accel => (0.0, self.limits.max_accel),
            SetpointField::Decel => (0.0, self.limits.max_decel),
            SetpointField::AbsolutePosition => {
                (self.calibration.min_degrees, self.calibration.max_degrees)
            },
            SetpointField::RelativePosition => {
                let span = self.calibration.span();
                (-span, span)
            },
        }
    }

    /// 操作员修改字段文本
    ///
    /// 立即截断到范围并保留一位小数，返回截断后的值。
    pub fn edit(
        &self,
        setpoints: &mut AxisSetpoints,
        field: SetpointField,
        text: &str,
    ) -> Option<f64> {
        let (min, max) = self.range(field);
        let state = setpoints.field_mut(field);
        state.text = text.trim().to_string();
        state.entered = state.text.parse::<f64>().ok().filter(|v| v.is_finite());
        state.pending = state.entered.map(|v| one_decimal(v.clamp(min, max)));
        state.phase = SetpointPhase::PendingEdit;
        state.pending
    }

    /// 操作员按下确认
    ///
    /// 依次校验：(a) 有数值；(b) 相对移动的目标位置在限位内；
    /// (c) 输入值在字段范围内。被拒绝后字段保留截断值，再次确认即可发送截断值。
    pub fn request_confirmation(
        &self,
        setpoints: &mut AxisSetpoints,
        field: SetpointField,
        current_position: Option<f64>,
    ) -> Result<ConfirmationRequest, SetpointError> {
        let (min, max) = self.range(field);
        let state = setpoints.field_mut(field);

        let entered = match state.entered {
            Some(v) => v,
            None if state.text.is_empty() => return Err(SetpointError::MissingValue(field)),
            None => {
                return Err(SetpointError::NotNumeric {
                    field,
                    text: state.text.clone(),
                });
            },
        };

        let mut target_position = None;
        if field == SetpointField::RelativePosition {
            let current = current_position.ok_or(SetpointError::PositionUnknown)?;
            let target = current + entered;
            if !self.calibration.contains(target) {
                return Err(SetpointError::RelativeTargetOutOfRange {
                    current,
                    target,
                    min: self.calibration.min_degrees,
                    max: self.calibration.max_degrees,
                });
            }
            target_position = Some(target);
        }

        if entered < min || entered > max {
            // 之后的确认使用截断值
            state.entered = state.pending;
            return Err(SetpointError::OutOfRange {
                field,
                value: entered,
                min,
                max,
            });
        }

        let value = one_decimal(entered);
        state.pending = Some(value);
        state.phase = SetpointPhase::AwaitingConfirmation;
        Ok(ConfirmationRequest {
            field,
            value,
            current_position: target_position.and(current_position),
            target_position,
        })
    }

    /// 确认提示被拒绝
    pub fn decline(&self, setpoints: &mut AxisSetpoints, field: SetpointField) -> ConfirmationOutcome {
        let state = setpoints.field_mut(field);
        state.restore();
        ConfirmationOutcome::Declined {
            restored: state.confirmed,
        }
    }

    /// 取出等待发送的值
    pub fn accepted_value(
        &self,
        setpoints: &AxisSetpoints,
        field: SetpointField,
    ) -> Result<f64, SetpointError> {
        let state = setpoints.field(field);
        match (state.phase, state.pending) {
            (SetpointPhase::AwaitingConfirmation, Some(value)) => Ok(value),
            _ => Err(SetpointError::NotAwaitingConfirmation { field }),
        }
    }

    /// 发送成功：值成为新的确认值
    pub fn mark_sent(&self, setpoints: &mut AxisSetpoints, field: SetpointField, value: f64) {
        let state = setpoints.field_mut(field);
        state.confirmed = Some(value);
        state.restore();
    }

    /// 发送失败：保持待确认值，等待操作员重试
    pub fn mark_failed(&self, setpoints: &mut AxisSetpoints, field: SetpointField) {
        setpoints.field_mut(field).phase = SetpointPhase::Failed;
    }

    /// 取消编辑（任意非 Idle 状态）
    pub fn cancel(&self, setpoints: &mut AxisSetpoints, field: SetpointField) -> Option<f64> {
        let state = setpoints.field_mut(field);
        if state.phase != SetpointPhase::Idle {
            state.restore();
        }
        state.confirmed
    }
}
