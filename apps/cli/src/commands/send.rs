//! 单条命令
//!
//! 与 Shell 走同一条路径：设定值经过范围校验与确认，动作命令直接发送。

use crate::display;
use crate::utils::{confirm_setpoint, connect};
use anyhow::{Result, anyhow};
use clap::Args;
use servo_control::{ConfirmationOutcome, ConsoleConfig, ControllerSession, SetpointField};
use servo_driver::poll_cycle;
use servo_protocol::{AxisAction, AxisId};
use std::sync::atomic::AtomicBool;

/// 单条命令参数
#[derive(Args, Debug)]
pub struct SendCommand {
    /// 轴（A-H 或 1-8）
    pub axis: AxisId,

    /// enable | disable | start | stop | zero | speed | accel | decel | abs | rel
    pub action: String,

    /// 设定值（度、度/秒等工程单位）
    #[arg(allow_hyphen_values = true)]
    pub value: Option<String>,

    /// 跳过确认提示
    #[arg(short, long)]
    pub yes: bool,
}

fn motion_action(name: &str) -> Option<AxisAction> {
    match name {
        "enable" => Some(AxisAction::Enable),
        "disable" => Some(AxisAction::Disable),
        "start" => Some(AxisAction::Start),
        "stop" => Some(AxisAction::Stop),
        "zero" => Some(AxisAction::ZeroPosition),
        _ => None,
    }
}

fn print_notices(session: &mut ControllerSession) {
    for notice in session.take_notices() {
        if let Some(line) = display::render(&notice) {
            println!("{}", line);
        }
    }
}

impl SendCommand {
    pub fn execute(&self, config: &ConsoleConfig) -> Result<()> {
        let mut session = connect(config)?;
        let result = self.run(config, &mut session);
        print_notices(&mut session);
        session.close();
        result
    }

    fn run(&self, config: &ConsoleConfig, session: &mut ControllerSession) -> Result<()> {
        let axis = self.axis;
        let name = self.action.trim().to_ascii_lowercase();

        if let Some(action) = motion_action(&name) {
            session.send_motion(axis, action)?;
            return Ok(());
        }

        let field: SetpointField = name.parse().map_err(|e: String| anyhow!(e))?;
        let text = self
            .value
            .as_deref()
            .ok_or_else(|| anyhow!("{} 需要一个数值", field))?;

        if field == SetpointField::RelativePosition {
            // 相对移动需要当前位置
            let running = AtomicBool::new(true);
            let event = poll_cycle(
                session.transport().map(|t| t.as_ref()),
                axis,
                &config.polling.polling_config(),
                &running,
            );
            session.handle_telemetry(&event);
        }

        session.edit_setpoint(axis, field, text);
        let request = session.request_confirmation(axis, field)?;
        print_notices(session);

        let accepted = self.yes || confirm_setpoint(axis, &request)?;
        match session.complete_confirmation(axis, field, accepted)? {
            ConfirmationOutcome::Sent { .. } => {},
            ConfirmationOutcome::Declined { .. } => println!("已取消"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_actions() {
        assert_eq!(motion_action("zero"), Some(AxisAction::ZeroPosition));
        assert_eq!(motion_action("speed"), None);
    }
}
