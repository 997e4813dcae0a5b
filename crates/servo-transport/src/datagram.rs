//! UDP 数据报传输
//!
//! 绑定本地地址，向远端发送 UTF-8 命令；读线程把每个数据报作为一条消息入队。

use crate::{JoinTimeout, ReplyQueue, TransportError};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// 读超时，决定读线程检查退出标志的间隔
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// UDP 数据报传输
pub struct DatagramTransport {
    socket: Mutex<Option<UdpSocket>>,
    remote: SocketAddr,
    queue: ReplyQueue,
    is_running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DatagramTransport {
    pub fn open(remote: &str, local: &str) -> Result<Self, TransportError> {
        let remote = parse_addr(remote)?;
        let local = parse_addr(local)?;

        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let rx_socket = socket.try_clone()?;

        let queue = ReplyQueue::new();
        let is_running = Arc::new(AtomicBool::new(true));
        let thread_queue = queue.clone();
        let thread_running = is_running.clone();
        let handle = std::thread::Builder::new()
            .name("servo-udp-rx".into())
            .spawn(move || read_loop(rx_socket, thread_queue, thread_running))?;

        debug!(
            "UDP transport bound to {} (remote {})",
            socket.local_addr()?,
            remote
        );
        Ok(Self {
            socket: Mutex::new(Some(socket)),
            remote,
            queue,
            is_running,
            reader: Mutex::new(Some(handle)),
        })
    }

    pub fn send(&self, command: &str) -> Result<(), TransportError> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;
        trace!("SENT: {}", command);
        socket.send_to(command.as_bytes(), self.remote)?;
        Ok(())
    }

    /// 实际绑定的本地地址（本地端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;
        Ok(socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn close(&self) {
        self.is_running.store(false, Ordering::Release);
        let socket = self.socket.lock().take();
        if let Some(handle) = self.reader.lock().take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "UDP reader thread failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
        if socket.is_some() {
            debug!("UDP transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.lock().is_none()
    }

    pub fn queue(&self) -> &ReplyQueue {
        &self.queue
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_addr(address: &str) -> Result<SocketAddr, TransportError> {
    address
        .trim()
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}

fn read_loop(socket: UdpSocket, queue: ReplyQueue, is_running: Arc<AtomicBool>) {
    let mut buf = [0u8; 1024];
    while is_running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let message = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                if !message.is_empty() {
                    trace!("RECV from {}: {}", from, message);
                    queue.push(message);
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {},
            Err(e) => {
                // ICMP 端口不可达等瞬时错误，继续读取
                warn!("UDP receive error: {}", e);
                std::thread::sleep(READ_TIMEOUT);
            },
        }
    }
    trace!("UDP reader exiting");
}
