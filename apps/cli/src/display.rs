//! 终端显示层
//!
//! 把会话通知渲染成文本行。

use servo_control::{AxisSnapshot, ConsoleNotice};

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

fn fmt_enabled(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

/// 渲染一条通知；确认请求由输入线程处理，返回 `None`
pub fn render(notice: &ConsoleNotice) -> Option<String> {
    let line = match notice {
        ConsoleNotice::Telemetry {
            axis,
            position,
            raw_reply,
            torque,
            speed,
            enabled,
        } => format!(
            "[{}] pos {:>7}  torque {:>6}  speed {:>7}  {:<3}  raw {}",
            axis,
            position.to_string(),
            fmt_opt(*torque),
            fmt_opt(*speed),
            fmt_enabled(*enabled),
            raw_reply.as_deref().unwrap_or("-")
        ),
        ConsoleNotice::PositionUnavailable { axis } => {
            format!("⚠️  [{}] 位置不可用（连续无效回复）", axis)
        },
        ConsoleNotice::EnabledChanged { axis, enabled } => {
            format!("[{}] 使能状态: {}", axis, fmt_enabled(*enabled))
        },
        ConsoleNotice::LimitTripped {
            axis,
            position,
            stop_sent,
        } => {
            if *stop_sent {
                format!("🛑 [{}] 位置 {:.1} 超出软限位，已发送停止", axis, position)
            } else {
                format!("🛑 [{}] 位置 {:.1} 超出软限位，停止命令未能发送！", axis, position)
            }
        },
        ConsoleNotice::LimitCleared { axis, position } => {
            format!("✅ [{}] 回到限位内 ({:.1})", axis, position)
        },
        ConsoleNotice::CommandSent {
            axis,
            command,
            reply,
        } => match reply {
            Some(reply) => format!("  [{}] → {}  ← {}", axis, command, reply),
            None => format!("  [{}] → {}", axis, command),
        },
        ConsoleNotice::CommandFailed {
            axis,
            command,
            error,
        } => format!("❌ [{}] {} 发送失败: {}", axis, command, error),
        ConsoleNotice::Rejected { axis, reason } => format!("❌ [{}] {}", axis, reason),
        ConsoleNotice::JogCapped {
            axis,
            requested,
            speed,
        } => format!(
            "⚠️  [{}] 位于下限，点动速度 {:.1} 限制为 {:.1}",
            axis, requested, speed
        ),
        ConsoleNotice::SetpointEdited { axis, field, value } => match value {
            Some(v) => format!("[{}] {} = {:.1}（待确认，输入 'ok {}' 发送）", axis, field, v, field),
            None => format!("[{}] {}: 不是有效数值", axis, field),
        },
        ConsoleNotice::ConfirmationRequired { .. } => return None,
        ConsoleNotice::ConfirmationRejected {
            axis,
            field,
            reason,
        } => format!("❌ [{}] {}: {}", axis, field, reason),
        ConsoleNotice::SetpointConfirmed { axis, field, value } => {
            format!("✅ [{}] {} = {:.1} 已发送", axis, field, value)
        },
        ConsoleNotice::SetpointRestored { axis, field, value } => {
            format!("[{}] {} 恢复为 {}", axis, field, fmt_opt(*value))
        },
        ConsoleNotice::AxisSelected(axis) => format!("当前轴: {}", axis),
        ConsoleNotice::Status(snapshot) => render_snapshot(snapshot),
        ConsoleNotice::ProbeReply(reply) => match reply {
            Some(reply) => format!("📡 控制器回复: {}", reply),
            None => "📡 控制器无回复".to_string(),
        },
    };
    Some(line)
}

/// 单轴状态表
pub fn render_snapshot(snapshot: &AxisSnapshot) -> String {
    let cal = &snapshot.calibration;
    let mut out = format!(
        "📊 轴 {}\n  位置: {}  (限位 {:.1} .. {:.1})\n  使能: {}  限位触发: {}\n  扭矩: {}  速度: {}",
        snapshot.axis,
        snapshot.position,
        cal.min_degrees,
        cal.max_degrees,
        fmt_enabled(snapshot.enabled),
        if snapshot.limit_tripped { "是" } else { "否" },
        fmt_opt(snapshot.torque),
        fmt_opt(snapshot.speed),
    );
    for (field, value, pending) in &snapshot.setpoints {
        out.push_str(&format!(
            "\n  {:<6} {:>8}{}",
            field.name(),
            fmt_opt(*value),
            if *pending { "  *" } else { "" }
        ));
    }
    out
}
