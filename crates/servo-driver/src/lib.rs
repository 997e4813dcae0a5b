//! 驱动层模块
//!
//! 在独立线程上周期性轮询当前选中轴的遥测数据，并通过事件通道
//! 发送给控制循环。包括：
//! - 轮询线程生命周期（启动、协作式停止、带超时 join）
//! - 跨线程共享的轴选择（原子变量）
//! - 控制台事件类型（遥测、点动按下/松开、操作员命令）

mod error;
pub mod event;
pub mod poller;
pub mod selection;

pub use error::DriverError;
pub use event::{ConsoleEvent, JogDirection, TelemetryEvent};
pub use poller::{PollingConfig, PollingEngine, poll_cycle};
pub use selection::AxisSelection;
