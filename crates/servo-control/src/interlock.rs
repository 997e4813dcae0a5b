//! 软限位联锁
//!
//! - 位置越出 `[min, max]` 时触发一次停止（边沿触发），回到范围内时清除
//! - 两端均为闭区间，边界噪声不会来回切换
//! - 点动预检：在上限处禁止继续正向点动；在下限处负向点动限速

use crate::config::MotionLimits;
use crate::runtime::AxisRuntimeState;
use servo_protocol::AxisCalibration;

/// 联锁状态切换
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterlockTransition {
    /// 刚越出限位，需要发送停止命令
    Tripped { position: f64 },
    /// 回到限位内
    Recovered { position: f64 },
}

/// 按一次有效位置更新联锁标志
pub fn evaluate(
    state: &mut AxisRuntimeState,
    calibration: &AxisCalibration,
    position: f64,
) -> Option<InterlockTransition> {
    let inside = calibration.contains(position);
    match (inside, state.limit_tripped) {
        (false, false) => {
            state.limit_tripped = true;
            Some(InterlockTransition::Tripped { position })
        },
        (true, true) => {
            state.limit_tripped = false;
            Some(InterlockTransition::Recovered { position })
        },
        _ => None,
    }
}

/// 点动预检结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JogDecision {
    /// 按请求速度点动（度/秒，带符号）
    Allowed { speed: f64 },
    /// 位于下限，负向速度被限制
    Capped { requested: f64, speed: f64 },
    /// 位于上限，拒绝继续正向点动
    Rejected { position: f64, max: f64 },
}

impl JogDecision {
    /// 实际发送的速度；被拒绝时为 `None`
    pub fn speed(&self) -> Option<f64> {
        match *self {
            JogDecision::Allowed { speed } | JogDecision::Capped { speed, .. } => Some(speed),
            JogDecision::Rejected { .. } => None,
        }
    }
}

/// 点动预检
///
/// `position` 未知时放行（由调用方记录警告）。
pub fn check_jog(
    calibration: &AxisCalibration,
    limits: &MotionLimits,
    position: Option<f64>,
    speed: f64,
) -> JogDecision {
    let Some(position) = position else {
        return JogDecision::Allowed { speed };
    };

    if position >= calibration.max_degrees && speed > 0.0 {
        return JogDecision::Rejected {
            position,
            max: calibration.max_degrees,
        };
    }

    if position <= calibration.min_degrees && speed < 0.0 {
        let cap = limits.creep_back_speed();
        if speed.abs() > cap {
            return JogDecision::Capped {
                requested: speed,
                speed: -cap,
            };
        }
    }

    JogDecision::Allowed { speed }
}
