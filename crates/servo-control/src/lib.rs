//! # Servo Control
//!
//! 控制台核心：配置加载、单轴运行时状态、设定值确认状态机、
//! 软限位联锁、控制器会话与控制循环。
//!
//! ## 线程模型
//!
//! - 控制循环线程独占 [`ControllerSession`] 及其全部运行时状态
//! - 轮询线程（`servo-driver`）只共享传输与轴选择，结果经事件通道送回
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use servo_control::{ConsoleConfig, ControllerSession, console};
//! use servo_driver::PollingEngine;
//! use std::path::Path;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConsoleConfig::load(Path::new("servo.toml"))?;
//! let (mut session, _init_error) = ControllerSession::connect(&config);
//!
//! let (tx, rx) = crossbeam_channel::unbounded::<console::Event>();
//! let engine = PollingEngine::spawn(
//!     session.transport().cloned(),
//!     session.selection(),
//!     tx,
//!     config.polling.polling_config(),
//! )?;
//!
//! let shutdown = AtomicBool::new(false);
//! console::run(&mut session, &rx, &shutdown, console::DEFAULT_TICK, |notice| {
//!     println!("{notice:?}");
//! });
//! engine.shutdown()?;
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod interlock;
pub mod runtime;
pub mod session;
pub mod setpoint;

pub use config::{ConfigError, ConsoleConfig, MotionLimits, PollingSettings};
pub use console::{Event, Flow, LoopExit};
pub use interlock::{InterlockTransition, JogDecision};
pub use runtime::{AxisRuntimeState, PositionDisplay};
pub use session::{AxisSnapshot, ConsoleNotice, ControllerSession, OperatorCommand, SessionError};
pub use setpoint::{
    AxisSetpoints, ConfirmationOutcome, ConfirmationRequest, FieldState, SetpointController,
    SetpointError, SetpointField, SetpointPhase,
};
