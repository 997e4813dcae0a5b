//! 当前选中轴
//!
//! 控制循环写、轮询线程读。切换后从下一个轮询周期开始生效。

use servo_protocol::AxisId;
use std::sync::atomic::{AtomicU8, Ordering};

/// 原子轴选择
///
/// 内部存储轴号（1-8），读写均为无锁操作。
#[derive(Debug)]
pub struct AxisSelection {
    inner: AtomicU8,
}

impl AxisSelection {
    pub fn new(axis: AxisId) -> Self {
        Self {
            inner: AtomicU8::new(axis.number()),
        }
    }

    /// 当前选中轴（存储值异常时回退到 A 轴）
    pub fn get(&self) -> AxisId {
        AxisId::new(self.inner.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// 切换轴，返回之前的轴
    pub fn set(&self, axis: AxisId) -> AxisId {
        let previous = self.inner.swap(axis.number(), Ordering::AcqRel);
        AxisId::new(previous).unwrap_or_default()
    }
}

impl Default for AxisSelection {
    fn default() -> Self {
        Self::new(AxisId::A)
    }
}
