//! 轴标识
//!
//! 控制器最多驱动 8 个轴。Galil 方言使用字母 A-H，ClearCore 方言使用数字 1-8。

use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// 轴标识（内部存储 1-8）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisId(u8);

impl AxisId {
    /// 轴数量
    pub const COUNT: usize = 8;

    pub const A: AxisId = AxisId(1);
    pub const B: AxisId = AxisId(2);
    pub const C: AxisId = AxisId(3);
    pub const D: AxisId = AxisId(4);
    pub const E: AxisId = AxisId(5);
    pub const F: AxisId = AxisId(6);
    pub const G: AxisId = AxisId(7);
    pub const H: AxisId = AxisId(8);

    /// 从轴号（1-8）创建
    pub fn new(number: u8) -> Result<Self, ProtocolError> {
        if (1..=Self::COUNT as u8).contains(&number) {
            Ok(Self(number))
        } else {
            Err(ProtocolError::InvalidAxis(number.to_string()))
        }
    }

    /// 从数组下标（0-7）创建
    pub fn from_index(index: usize) -> Result<Self, ProtocolError> {
        if index < Self::COUNT {
            Ok(Self(index as u8 + 1))
        } else {
            Err(ProtocolError::InvalidAxis(index.to_string()))
        }
    }

    /// 从轴字母（A-H，大小写不敏感）创建
    pub fn from_letter(letter: char) -> Result<Self, ProtocolError> {
        let upper = letter.to_ascii_uppercase();
        if ('A'..='H').contains(&upper) {
            Ok(Self(upper as u8 - b'A' + 1))
        } else {
            Err(ProtocolError::InvalidAxis(letter.to_string()))
        }
    }

    /// 轴号（1-8），ClearCore 方言使用
    pub fn number(self) -> u8 {
        self.0
    }

    /// 数组下标（0-7）
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// 轴字母（A-H），Galil 方言使用
    pub fn letter(self) -> char {
        (b'A' + self.0 - 1) as char
    }

    /// 依次遍历全部 8 个轴
    pub fn all() -> impl Iterator<Item = AxisId> {
        (1..=Self::COUNT as u8).map(AxisId)
    }
}

impl Default for AxisId {
    fn default() -> Self {
        Self::A
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for AxisId {
    type Err = ProtocolError;

    /// 接受 `A`-`H`（大小写不敏感）或 `1`-`8`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() => Self::new(c as u8 - b'0'),
            (Some(c), None) => Self::from_letter(c),
            _ => Err(ProtocolError::InvalidAxis(trimmed.to_string())),
        }
    }
}
