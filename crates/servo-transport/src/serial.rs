//! 串口传输
//!
//! 写端由调用方线程直接写入（命令以 `\r` 结尾），读端由独立读线程
//! 按行切分后推入回复队列。

use crate::{JoinTimeout, ReplyQueue, TransportError};
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 字节流按行切分
///
/// `\r` 与 `\n` 均视为行结束；去掉首尾空白与行首残留的 `:` 提示符，丢弃空行。
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\r' || b == b'\n' {
                let raw = String::from_utf8_lossy(&self.pending);
                let line = raw.trim().trim_start_matches(':').trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
                self.pending.clear();
            } else {
                self.pending.push(b);
            }
        }
        lines
    }
}

/// 串口写端
struct PortWriter(Box<dyn SerialPort>);

impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

/// 串口传输
pub struct SerialTransport {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    queue: ReplyQueue,
    is_running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// 打开串口并启动读线程
    ///
    /// `timeout` 为读超时，也决定了 `close()` 时读线程的最长退出延迟。
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let handle = serialport::new(port, baud_rate).timeout(timeout).open()?;
        let reader = handle.try_clone()?;
        debug!("Serial port {} opened at {} baud", port, baud_rate);
        Self::from_parts(Box::new(PortWriter(handle)), reader)
    }

    /// 由任意读写端构造
    pub fn from_parts<R>(writer: Box<dyn Write + Send>, reader: R) -> Result<Self, TransportError>
    where
        R: Read + Send + 'static,
    {
        let queue = ReplyQueue::new();
        let is_running = Arc::new(AtomicBool::new(true));

        let thread_queue = queue.clone();
        let thread_running = is_running.clone();
        let handle = std::thread::Builder::new()
            .name("servo-serial-rx".into())
            .spawn(move || read_loop(reader, thread_queue, thread_running))?;

        Ok(Self {
            writer: Mutex::new(Some(writer)),
            queue,
            is_running,
            reader: Mutex::new(Some(handle)),
        })
    }

    pub fn send(&self, command: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        trace!("SENT: {}", command);
        writer.write_all(command.as_bytes())?;
        writer.write_all(b"\r")?;
        writer.flush()?;
        Ok(())
    }

    pub fn close(&self) {
        self.is_running.store(false, Ordering::Release);
        let writer = self.writer.lock().take();
        if let Some(handle) = self.reader.lock().take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "Serial reader thread failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
        if writer.is_some() {
            debug!("Serial transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }

    pub fn queue(&self) -> &ReplyQueue {
        &self.queue
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R: Read>(mut source: R, queue: ReplyQueue, is_running: Arc<AtomicBool>) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 512];
    while is_running.load(Ordering::Acquire) {
        match source.read(&mut buf) {
            Ok(0) => {
                debug!("Serial reader reached end of stream");
                break;
            },
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    trace!("RECV: {}", line);
                    queue.push(line);
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                error!("Serial read failed: {}", e);
                break;
            },
        }
    }
    trace!("Serial reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 共享缓冲区写端
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_line_splitter() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b" 12.5").is_empty());
        assert_eq!(splitter.push(b"000\r\n:"), vec!["12.5000"]);
        // 提示符残留在下一行行首
        assert_eq!(splitter.push(b" 1.0000\r\n\r\n"), vec!["1.0000"]);
        assert!(splitter.push(b":\r").is_empty());
    }

    #[test]
    fn test_reader_thread_feeds_queue() {
        let reader = Cursor::new(b"MG _RPA\r 90.0000\r\n:\r\n".to_vec());
        let writer = SharedWriter::default();
        let transport = SerialTransport::from_parts(Box::new(writer.clone()), reader).unwrap();

        transport.send("MG _RPA").unwrap();
        assert_eq!(writer.0.lock().as_slice(), b"MG _RPA\r");

        let first = transport.queue().pop_timeout(Duration::from_secs(2));
        let second = transport.queue().pop_timeout(Duration::from_secs(2));
        assert_eq!(first.as_deref(), Some("MG _RPA"));
        assert_eq!(second.as_deref(), Some("90.0000"));

        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(transport.send("STA"), Err(TransportError::Closed)));
        transport.close();
    }
}
