//! 回复解析
//!
//! 设备回复中常混有回显、提示符与半截数据。这里是“什么算有效遥测值”
//! 的唯一判定点。

use regex::Regex;
use std::sync::LazyLock;

/// 确认提示符（仅此一个字符、没有负载的回复视为空回复）
pub const ACK_TOKEN: &str = ":";

/// 使能状态判定容差
pub const STATUS_TOLERANCE: f64 = 0.01;

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?[0-9]+\.[0-9]+").expect("Invalid numeric regex"));

/// 从原始回复中提取第一个带小数部分的数值
///
/// `None`、空串与单独的提示符返回 `None`；否则逐行扫描，
/// 返回第一个匹配 `-?[0-9]+\.[0-9]+` 的数值。
pub fn extract_numeric(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == ACK_TOKEN {
        return None;
    }
    raw.lines()
        .filter_map(|line| NUMERIC.find(line))
        .find_map(|m| m.as_str().parse::<f64>().ok())
}

/// 使能状态（`MG _MO<axis>` 的回复：0.0 = 使能，1.0 = 断使能）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoStatus {
    Enabled,
    Disabled,
    /// 其他数值，不得更新使能标志
    Indeterminate,
}

impl ServoStatus {
    pub fn classify(value: f64) -> Self {
        if (value - 0.0).abs() <= STATUS_TOLERANCE {
            ServoStatus::Enabled
        } else if (value - 1.0).abs() <= STATUS_TOLERANCE {
            ServoStatus::Disabled
        } else {
            ServoStatus::Indeterminate
        }
    }

    /// 转换为使能标志；不确定状态返回 `None`
    pub fn enabled(self) -> Option<bool> {
        match self {
            ServoStatus::Enabled => Some(true),
            ServoStatus::Disabled => Some(false),
            ServoStatus::Indeterminate => None,
        }
    }
}
