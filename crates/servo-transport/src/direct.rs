//! 以太网直连传输
//!
//! 控制器驱动库只需提供一个原语：发送命令并同步取回复，
//! 抽象为 [`CommandLink`]。[`TcpCommandLink`] 是基于 TCP 的 ASCII
//! 命令协议实现：命令以 `\r` 结尾，回复以 `:` 提示符结尾，`?` 表示拒绝。
//!
//! 读写出错后链路标记为失步：下一条命令发出前先读掉迟到的回复，
//! 宽限期内等不到提示符则重新连接，迟到回复不会被当成下一条命令的应答。

use crate::{ReplyQueue, TransportError};
use parking_lot::Mutex;
use servo_protocol::is_query;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 直连默认端口
pub const DEFAULT_DIRECT_PORT: u16 = 23;

/// 失步后等待迟到回复的时间（以读超时为单位）
const RESYNC_TIMEOUTS: u32 = 5;

/// 同步命令链路
pub trait CommandLink: Send {
    /// 发送一条命令并返回回复（不含提示符）
    fn command(&mut self, command: &str) -> Result<String, TransportError>;

    /// 释放链路
    fn close(&mut self) {}
}

/// 直连传输
pub struct DirectTransport {
    link: Mutex<Option<Box<dyn CommandLink>>>,
    queue: ReplyQueue,
}

impl DirectTransport {
    pub fn new(link: Box<dyn CommandLink>) -> Self {
        Self {
            link: Mutex::new(Some(link)),
            queue: ReplyQueue::new(),
        }
    }

    /// 查询命令内联返回回复；其余命令的非空回复进入队列
    pub fn send(&self, command: &str) -> Result<Option<String>, TransportError> {
        let mut guard = self.link.lock();
        let link = guard.as_mut().ok_or(TransportError::Closed)?;

        trace!("SENT: {}", command);
        let reply = link.command(command)?;
        trace!("RECV: {}", reply.escape_default());

        if is_query(command) {
            Ok(Some(reply))
        } else {
            if !reply.trim().is_empty() {
                self.queue.push(reply);
            }
            Ok(None)
        }
    }

    pub fn close(&self) {
        if let Some(mut link) = self.link.lock().take() {
            link.close();
            debug!("Direct transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.link.lock().is_none()
    }

    pub fn queue(&self) -> &ReplyQueue {
        &self.queue
    }
}

/// TCP 命令链路
pub struct TcpCommandLink {
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    /// 上一条命令没有读到完整回复
    out_of_sync: bool,
}

impl TcpCommandLink {
    /// 连接控制器
    ///
    /// `address` 为 `host` 或 `host:port`；`timeout` 同时用作连接与读超时。
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let peer = resolve(address)?;
        let stream = open_stream(peer, timeout)?;
        debug!("Connected to controller at {}", peer);
        Ok(Self {
            stream,
            peer,
            timeout,
            out_of_sync: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.out_of_sync
    }

    fn exchange(&mut self, command: &str) -> Result<String, TransportError> {
        self.stream.write_all(command.as_bytes())?;
        self.stream.write_all(b"\r")?;

        let mut reply = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(TransportError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "controller closed the connection",
                )));
            }
            reply.extend_from_slice(&buf[..n]);
            match reply.last() {
                Some(b':') => break,
                Some(b'?') => {
                    warn!("Controller rejected '{}'", command);
                    return Err(TransportError::Rejected(command.to_string()));
                },
                _ => {},
            }
        }

        reply.pop();
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }

    /// 读掉上一条命令的迟到回复；等不到提示符时重新连接
    fn resync(&mut self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.timeout * RESYNC_TIMEOUTS;
        let mut buf = [0u8; 256];
        let mut discarded = 0usize;
        while Instant::now() < deadline {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    discarded += n;
                    if matches!(buf[n - 1], b':' | b'?') {
                        debug!("Discarded {} bytes of late reply from {}", discarded, self.peer);
                        self.out_of_sync = false;
                        return Ok(());
                    }
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {},
                Err(e) => {
                    debug!("Resync read from {} failed: {}", self.peer, e);
                    break;
                },
            }
        }

        warn!("Link to {} out of sync, reconnecting", self.peer);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.stream = open_stream(self.peer, self.timeout)?;
        self.out_of_sync = false;
        Ok(())
    }
}

impl CommandLink for TcpCommandLink {
    fn command(&mut self, command: &str) -> Result<String, TransportError> {
        if self.out_of_sync {
            self.resync()?;
        }
        let result = self.exchange(command);
        if matches!(result, Err(TransportError::Io(_))) {
            self.out_of_sync = true;
        }
        result
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn open_stream(peer: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect_timeout(&peer, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// 解析 `host` / `host:port`
fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    let address = address.trim();
    let with_port = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_DIRECT_PORT}")
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedLink;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    /// 最小控制器模拟：逐条读取 `\r` 结尾的命令并应答
    ///
    /// `MG _RPB` 的回复延迟 300 ms；`MG _RPC` 从不回复。
    /// 依次服务 `connections` 个连接，返回收到的全部命令。
    fn spawn_fake_controller(
        listener: TcpListener,
        connections: usize,
    ) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut received = Vec::new();
            for _ in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                let mut writer = stream.try_clone().unwrap();
                let mut reader = std::io::BufReader::new(stream);
                loop {
                    let mut cmd = Vec::new();
                    match reader.read_until(b'\r', &mut cmd) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {},
                    }
                    let cmd = String::from_utf8_lossy(&cmd).trim().to_string();
                    let reply: &[u8] = match cmd.as_str() {
                        "MG _RPA" => b" 1234.5000\r\n:",
                        "MG _RPB" => {
                            thread::sleep(Duration::from_millis(300));
                            b" 185.0000\r\n:"
                        },
                        "MG _RPC" => b"",
                        "MG _TCB" => b" 2.0000\r\n:",
                        "XXA" => b"?",
                        _ => b":",
                    };
                    received.push(cmd);
                    if writer.write_all(reply).is_err() {
                        break;
                    }
                }
            }
            received
        })
    }

    #[test]
    fn test_tcp_link_query_and_command() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = spawn_fake_controller(listener, 1);

        let link = TcpCommandLink::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
        assert_eq!(link.peer(), addr);
        let transport = DirectTransport::new(Box::new(link));

        assert_eq!(
            transport.send("MG _RPA").unwrap().as_deref(),
            Some("1234.5000")
        );
        assert_eq!(transport.send("SHA").unwrap(), None);
        // 空回复不入队
        assert!(transport.queue().is_empty());
        assert!(matches!(
            transport.send("XXA"),
            Err(TransportError::Rejected(_))
        ));

        transport.close();
        let received = server.join().unwrap();
        assert_eq!(received, vec!["MG _RPA", "SHA", "XXA"]);
    }

    #[test]
    fn test_late_reply_is_not_taken_as_next_answer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = spawn_fake_controller(listener, 1);

        let mut link =
            TcpCommandLink::connect(&addr.to_string(), Duration::from_millis(100)).unwrap();
        assert!(matches!(link.command("MG _RPB"), Err(TransportError::Io(_))));
        assert!(link.is_out_of_sync());

        // 迟到的位置回复被丢弃，力矩查询拿到自己的回复
        assert_eq!(link.command("MG _TCB").unwrap(), "2.0000");
        assert!(!link.is_out_of_sync());
        assert_eq!(link.command("MG _RPA").unwrap(), "1234.5000");

        CommandLink::close(&mut link);
        assert_eq!(server.join().unwrap(), vec!["MG _RPB", "MG _TCB", "MG _RPA"]);
    }

    #[test]
    fn test_missing_reply_forces_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = spawn_fake_controller(listener, 2);

        let mut link =
            TcpCommandLink::connect(&addr.to_string(), Duration::from_millis(50)).unwrap();
        assert!(matches!(link.command("MG _RPC"), Err(TransportError::Io(_))));
        assert_eq!(link.command("MG _TCB").unwrap(), "2.0000");

        CommandLink::close(&mut link);
        assert_eq!(server.join().unwrap(), vec!["MG _RPC", "MG _TCB"]);
    }

    #[test]
    fn test_resolve_default_port() {
        let addr = resolve("127.0.0.1").unwrap();
        assert_eq!(addr.port(), DEFAULT_DIRECT_PORT);
        assert_eq!(resolve("127.0.0.1:5000").unwrap().port(), 5000);
        assert!(matches!(
            resolve("not an address"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_link_error_propagates() {
        let link = ScriptedLink::new();
        link.set_failing(true);
        let transport = DirectTransport::new(Box::new(link));
        assert!(matches!(transport.send("SHA"), Err(TransportError::Io(_))));
        assert!(!transport.is_closed());
    }
}
