//! Shell 命令解析

use anyhow::{Result, anyhow, bail};
use servo_control::{Event, OperatorCommand, SetpointField};
use servo_driver::{ConsoleEvent, JogDirection};
use servo_protocol::AxisId;

/// 一行 Shell 输入的解析结果
#[derive(Debug, PartialEq)]
pub enum ShellLine {
    /// 直接转发给控制循环
    Event(Event),
    /// 请求确认并等待提示
    Confirm(SetpointField),
    Help,
    Exit,
}

fn field_arg(parts: &[&str]) -> Result<SetpointField> {
    let name = parts
        .get(1)
        .ok_or_else(|| anyhow!("缺少字段名（speed, accel, decel, abs, rel）"))?;
    name.parse::<SetpointField>().map_err(|e| anyhow!(e))
}

fn operator(command: OperatorCommand) -> ShellLine {
    ShellLine::Event(ConsoleEvent::Operator(command))
}

/// 解析一行输入；`axis` 为当前选中轴（点动事件需要）
pub fn parse_line(line: &str, axis: AxisId) -> Result<ShellLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&head) = parts.first() else {
        bail!("空命令");
    };

    let parsed = match head.to_ascii_lowercase().as_str() {
        "axis" => {
            let target = parts.get(1).ok_or_else(|| anyhow!("缺少轴（A-H 或 1-8）"))?;
            operator(OperatorCommand::SelectAxis(target.parse::<AxisId>()?))
        },
        "enable" => operator(OperatorCommand::Enable),
        "disable" => operator(OperatorCommand::Disable),
        "start" => operator(OperatorCommand::Start),
        "stop" => operator(OperatorCommand::Stop),
        "zero" => operator(OperatorCommand::Zero),
        "jog" => {
            let direction = match parts.get(1).copied() {
                Some("+") => JogDirection::Positive,
                Some("-") => JogDirection::Negative,
                _ => bail!("用法: jog <+|->"),
            };
            ShellLine::Event(ConsoleEvent::JogPressed { axis, direction })
        },
        "release" => ShellLine::Event(ConsoleEvent::JogReleased { axis }),
        "set" => {
            let field = field_arg(&parts)?;
            let text = parts
                .get(2)
                .ok_or_else(|| anyhow!("用法: set {} <value>", field))?;
            operator(OperatorCommand::Edit {
                field,
                text: text.to_string(),
            })
        },
        "ok" => ShellLine::Confirm(field_arg(&parts)?),
        "cancel" => operator(OperatorCommand::Cancel(field_arg(&parts)?)),
        "status" => operator(OperatorCommand::Status),
        "probe" => operator(OperatorCommand::Probe),
        "help" | "?" => ShellLine::Help,
        "exit" | "quit" => ShellLine::Exit,
        other => bail!("未知命令: {}", other),
    };
    Ok(parsed)
}
