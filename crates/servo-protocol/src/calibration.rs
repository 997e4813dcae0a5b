//! 轴标定参数
//!
//! 每个轴一组静态参数，启动时加载后不再修改。

/// 标定缺失时使用的位置范围（度）
pub const DEFAULT_POSITION_RANGE: (f64, f64) = (0.0, 180.0);

/// 单轴标定参数
///
/// 换算关系：`pulses = round(degrees × scaling × gearbox)`。
///
/// # 不变量
///
/// `scaling_pulses_per_degree × gearbox_ratio > 0`。加载时拒绝负值；
/// 乘积为 0 时按 1 处理，避免除零。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisCalibration {
    /// 软限位下限（度）
    pub min_degrees: f64,
    /// 软限位上限（度）
    pub max_degrees: f64,
    /// 每转脉冲数
    pub pulses_per_revolution: f64,
    /// 每转角度
    pub degrees_per_revolution: f64,
    /// 每度脉冲数（电机侧）
    pub scaling_pulses_per_degree: f64,
    /// 减速比
    pub gearbox_ratio: f64,
}

impl AxisCalibration {
    /// 仅设置软限位与换算系数的便捷构造器
    pub fn new(min_degrees: f64, max_degrees: f64, scaling: f64, gearbox: f64) -> Self {
        Self {
            min_degrees,
            max_degrees,
            pulses_per_revolution: scaling * 360.0,
            degrees_per_revolution: 360.0,
            scaling_pulses_per_degree: scaling,
            gearbox_ratio: gearbox,
        }
    }

    /// 标定缺失时的兜底参数：默认位置范围，1 脉冲/度
    pub fn fallback() -> Self {
        Self::new(DEFAULT_POSITION_RANGE.0, DEFAULT_POSITION_RANGE.1, 1.0, 1.0)
    }

    /// 有效换算系数（脉冲/度）
    ///
    /// 乘积非正或非有限时返回 1.0。
    pub fn pulses_per_degree(&self) -> f64 {
        let factor = self.scaling_pulses_per_degree * self.gearbox_ratio;
        if factor.is_finite() && factor > 0.0 {
            factor
        } else {
            1.0
        }
    }

    /// 度 → 脉冲（四舍五入）
    pub fn to_pulses(&self, degrees: f64) -> i64 {
        (degrees * self.pulses_per_degree()).round() as i64
    }

    /// 脉冲 → 度
    pub fn to_degrees(&self, pulses: i64) -> f64 {
        pulses as f64 / self.pulses_per_degree()
    }

    /// 位置是否在软限位内（两端均为闭区间）
    pub fn contains(&self, degrees: f64) -> bool {
        degrees >= self.min_degrees && degrees <= self.max_degrees
    }

    /// 限制到软限位范围
    pub fn clamp(&self, degrees: f64) -> f64 {
        degrees.clamp(self.min_degrees, self.max_degrees)
    }

    /// 行程跨度（度）
    pub fn span(&self) -> f64 {
        self.max_degrees - self.min_degrees
    }
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self::fallback()
    }
}
