//! 脚本化命令链路（无硬件测试用）
//!
//! 按命令文本预设回复，记录所有已发送命令。克隆出的句柄共享状态，
//! 测试可以在链路交给传输层之后继续修改脚本并检查发送记录。

use crate::{CommandLink, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Script {
    /// 一次性回复，按顺序消费
    once: HashMap<String, VecDeque<String>>,
    /// 一次性回复耗尽后的常驻回复
    always: HashMap<String, String>,
    sent: Vec<String>,
    failing: bool,
    closed: bool,
}

/// 脚本化命令链路
#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    script: Arc<Mutex<Script>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `command` 追加一条一次性回复
    pub fn reply(&self, command: &str, reply: &str) {
        self.script
            .lock()
            .once
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// 为 `command` 设置常驻回复
    pub fn reply_always(&self, command: &str, reply: &str) {
        self.script
            .lock()
            .always
            .insert(command.to_string(), reply.to_string());
    }

    /// 开启后所有命令返回 IO 错误（仍会记录）
    pub fn set_failing(&self, failing: bool) {
        self.script.lock().failing = failing;
    }

    /// 已发送的全部命令
    pub fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    /// `command` 被发送的次数
    pub fn count(&self, command: &str) -> usize {
        self.script
            .lock()
            .sent
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn clear_sent(&self) {
        self.script.lock().sent.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

impl CommandLink for ScriptedLink {
    fn command(&mut self, command: &str) -> Result<String, TransportError> {
        let mut script = self.script.lock();
        script.sent.push(command.to_string());
        if script.failing {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted link failure",
            )));
        }
        if let Some(reply) = script.once.get_mut(command).and_then(|q| q.pop_front()) {
            return Ok(reply);
        }
        Ok(script.always.get(command).cloned().unwrap_or_default())
    }

    fn close(&mut self) {
        self.script.lock().closed = true;
    }
}
