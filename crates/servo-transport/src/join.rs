//! 带超时的线程 join

use std::thread::{JoinHandle, spawn};
use std::time::Duration;

/// 带超时的 join
///
/// 超时后看门狗线程继续等待目标线程，进程退出时由操作系统回收。
pub trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}
