//! 回复队列
//!
//! 后台读线程写入、轮询线程与控制循环读取的无界 FIFO。

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// 线程安全回复队列
///
/// 克隆出的句柄共享同一个队列。
#[derive(Debug, Clone)]
pub struct ReplyQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl ReplyQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, message: String) {
        // 自身持有 rx，发送不会失败
        let _ = self.tx.send(message);
    }

    pub fn try_pop(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// 最多等待 `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        if timeout.is_zero() {
            return self.try_pop();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 清空队列，返回丢弃条数
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for ReplyQueue {
    fn default() -> Self {
        Self::new()
    }
}
