//! # Servo Transport Layer
//!
//! 控制器通信传输层：三种可互换的链路，统一为 `send / receive / close`。
//!
//! - [`DirectTransport`]：以太网直连命令链路，查询命令同步返回回复
//! - [`SerialTransport`]：串口文本链路，后台读线程按行收取回复
//! - [`DatagramTransport`]：UDP 数据报链路，后台读线程逐包收取回复
//!
//! 所有异步回复进入同一个 [`ReplyQueue`]（线程安全 FIFO）。
//! 传输层方法均为 `&self`，可通过 `Arc<Transport>` 在轮询线程与控制循环间共享。

use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub mod datagram;
pub mod direct;
pub mod join;
pub mod queue;
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use datagram::DatagramTransport;
pub use direct::{CommandLink, DEFAULT_DIRECT_PORT, DirectTransport, TcpCommandLink};
pub use join::JoinTimeout;
pub use queue::ReplyQueue;
pub use serial::{LineSplitter, SerialTransport};

#[cfg(any(test, feature = "mock"))]
pub use mock::ScriptedLink;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    /// 建立连接失败（会话进入降级模式）
    #[error("Failed to open {mode} transport: {message}")]
    Init { mode: &'static str, message: String },

    /// 会话中途的收发失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// 已调用 `close()`
    #[error("Transport closed")]
    Closed,

    /// 没有可用的传输（降级模式）
    #[error("Communications unavailable")]
    Unavailable,

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// 控制器以 `?` 拒绝了命令
    #[error("Command rejected by controller: {0}")]
    Rejected(String),
}

/// 传输模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Direct,
    Serial,
    Datagram,
}

impl TransportMode {
    pub fn name(self) -> &'static str {
        match self {
            TransportMode::Direct => "direct",
            TransportMode::Serial => "serial",
            TransportMode::Datagram => "datagram",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 传输配置（每个会话只有一种模式生效）
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// `host` 或 `host:port`（默认端口 23）
    Direct { address: String, timeout: Duration },
    Serial {
        port: String,
        baud_rate: u32,
        timeout: Duration,
    },
    /// 远端与本地各一个 `ip:port`
    Datagram { remote: String, local: String },
}

impl TransportConfig {
    pub fn mode(&self) -> TransportMode {
        match self {
            TransportConfig::Direct { .. } => TransportMode::Direct,
            TransportConfig::Serial { .. } => TransportMode::Serial,
            TransportConfig::Datagram { .. } => TransportMode::Datagram,
        }
    }
}

/// 传输实例（封闭的三选一）
pub enum Transport {
    Direct(DirectTransport),
    Serial(SerialTransport),
    Datagram(DatagramTransport),
}

impl Transport {
    /// 按配置建立连接
    ///
    /// 任何失败都归一为 [`TransportError::Init`]，调用方据此进入降级模式。
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        let mode = config.mode();
        let opened = match config {
            TransportConfig::Direct { address, timeout } => {
                TcpCommandLink::connect(address, *timeout)
                    .map(|link| Transport::Direct(DirectTransport::new(Box::new(link))))
            },
            TransportConfig::Serial {
                port,
                baud_rate,
                timeout,
            } => SerialTransport::open(port, *baud_rate, *timeout).map(Transport::Serial),
            TransportConfig::Datagram { remote, local } => {
                DatagramTransport::open(remote, local).map(Transport::Datagram)
            },
        };

        match opened {
            Ok(transport) => {
                info!("{} transport opened", mode);
                Ok(transport)
            },
            Err(e) => Err(TransportError::Init {
                mode: mode.name(),
                message: e.to_string(),
            }),
        }
    }

    /// 使用任意命令链路构造直连传输（测试与自定义驱动库接入）
    pub fn from_link(link: Box<dyn CommandLink>) -> Self {
        Transport::Direct(DirectTransport::new(link))
    }

    pub fn mode(&self) -> TransportMode {
        match self {
            Transport::Direct(_) => TransportMode::Direct,
            Transport::Serial(_) => TransportMode::Serial,
            Transport::Datagram(_) => TransportMode::Datagram,
        }
    }

    /// 发送一条命令
    ///
    /// 仅直连模式下的查询命令会返回 `Some(reply)`；其余回复进入回复队列。
    pub fn send(&self, command: &str) -> Result<Option<String>, TransportError> {
        match self {
            Transport::Direct(t) => t.send(command),
            Transport::Serial(t) => t.send(command).map(|_| None),
            Transport::Datagram(t) => t.send(command).map(|_| None),
        }
    }

    /// 在 `timeout` 内取下一条异步回复
    pub fn receive(&self, timeout: Duration) -> Option<String> {
        self.queue().pop_timeout(timeout)
    }

    /// 非阻塞清空回复队列，返回丢弃的条数
    pub fn drain(&self) -> usize {
        self.queue().drain()
    }

    /// 释放底层资源（幂等）
    pub fn close(&self) {
        match self {
            Transport::Direct(t) => t.close(),
            Transport::Serial(t) => t.close(),
            Transport::Datagram(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Transport::Direct(t) => t.is_closed(),
            Transport::Serial(t) => t.is_closed(),
            Transport::Datagram(t) => t.is_closed(),
        }
    }

    pub fn queue(&self) -> &ReplyQueue {
        match self {
            Transport::Direct(t) => t.queue(),
            Transport::Serial(t) => t.queue(),
            Transport::Datagram(t) => t.queue(),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_transport_through_enum() {
        let link = ScriptedLink::new();
        link.reply_always("MG _RPA", "12.5000");
        link.reply_always("SHA", "ok");
        let transport = Transport::from_link(Box::new(link.clone()));
        assert_eq!(transport.mode(), TransportMode::Direct);

        assert_eq!(
            transport.send("MG _RPA").unwrap().as_deref(),
            Some("12.5000")
        );
        // 非查询命令的回复进入队列
        assert_eq!(transport.send("SHA").unwrap(), None);
        assert_eq!(
            transport.receive(Duration::from_millis(10)).as_deref(),
            Some("ok")
        );
        assert_eq!(transport.receive(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_close_is_idempotent_and_fails_fast() {
        let transport = Transport::from_link(Box::new(ScriptedLink::new()));
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send("SHA"),
            Err(TransportError::Closed)
        ));
        assert_eq!(transport.receive(Duration::ZERO), None);
    }

    #[test]
    fn test_open_failure_is_init_error() {
        let config = TransportConfig::Datagram {
            remote: "not an address".to_string(),
            local: "127.0.0.1:0".to_string(),
        };
        match Transport::open(&config) {
            Err(TransportError::Init { mode, .. }) => assert_eq!(mode, "datagram"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[test]
    fn test_config_mode() {
        let config = TransportConfig::Serial {
            port: "/dev/null".into(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
        };
        assert_eq!(config.mode(), TransportMode::Serial);
        assert_eq!(config.mode().to_string(), "serial");
    }
}
