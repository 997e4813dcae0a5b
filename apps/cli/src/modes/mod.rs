//! 运行模式
//!
//! - One-shot 命令见 `commands`
//! - Shell 模式：常驻会话 + 轮询线程 + 专用输入线程

pub mod shell;
