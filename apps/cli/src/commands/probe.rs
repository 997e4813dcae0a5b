//! 连接检查

use crate::utils::connect;
use anyhow::Result;
use servo_control::ConsoleConfig;

/// 发送版本查询并打印回复
pub fn execute(config: &ConsoleConfig) -> Result<()> {
    let mut session = connect(config)?;
    let reply = session.probe();
    session.close();

    match reply? {
        Some(reply) => println!("📡 控制器回复: {}", reply),
        None => println!("⚠️  已连接，但控制器未回复"),
    }
    Ok(())
}
