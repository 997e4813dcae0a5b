//! 驱动层错误类型定义

use servo_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 轮询线程创建失败
    #[error("Failed to spawn polling thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// 轮询线程未能在宽限期内退出（或已 panic）
    #[error("Polling thread did not stop within {0:?}")]
    JoinTimeout(Duration),
}
