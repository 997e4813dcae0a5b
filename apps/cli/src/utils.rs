//! 连接与交互工具

use anyhow::{Context, Result};
use servo_control::{ConfirmationRequest, ConsoleConfig, ControllerSession};
use servo_protocol::AxisId;
use servo_transport::TransportConfig;
use tracing::info;

/// 建立会话；无法连接时返回错误（one-shot 命令不支持降级模式）
pub fn connect(config: &ConsoleConfig) -> Result<ControllerSession> {
    println!("⏳ 连接到控制器 ({})...", describe_transport(&config.transport));
    let (session, init_error) = ControllerSession::connect(config);
    match init_error {
        None => {
            info!("Connected via {}", config.transport.mode());
            println!("✅ 已连接");
            Ok(session)
        },
        Some(e) => {
            report_init_error(&config.transport);
            Err(e).context("无法连接控制器")
        },
    }
}

/// 连接失败时的补充提示
pub fn report_init_error(transport: &TransportConfig) {
    if let TransportConfig::Serial { port, .. } = transport {
        eprintln!("⚠️  无法打开串口 {}", port);
        list_serial_ports();
    }
}

fn list_serial_ports() {
    match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => eprintln!("💡 未发现可用串口"),
        Ok(ports) => {
            eprintln!("💡 可用串口:");
            for port in ports {
                eprintln!("  {}", port.port_name);
            }
        },
        Err(e) => eprintln!("💡 枚举串口失败: {}", e),
    }
}

/// 传输配置的一行描述
pub fn describe_transport(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Direct { address, .. } => format!("direct {}", address),
        TransportConfig::Serial {
            port, baud_rate, ..
        } => format!("serial {} @ {}", port, baud_rate),
        TransportConfig::Datagram { remote, local } => {
            format!("datagram {} (local {})", remote, local)
        },
    }
}

/// 设定值确认提示问句
pub fn confirmation_question(axis: AxisId, request: &ConfirmationRequest) -> String {
    match (request.current_position, request.target_position) {
        (Some(current), Some(target)) => format!(
            "轴 {} {} = {:.1}（{:.1}° → {:.1}°），确认发送？",
            axis, request.field, request.value, current, target
        ),
        _ => format!(
            "轴 {} {} = {:.1}，确认发送？",
            axis, request.field, request.value
        ),
    }
}

/// 询问操作员是否发送设定值（默认 No）
pub fn confirm_setpoint(axis: AxisId, request: &ConfirmationRequest) -> Result<bool> {
    inquire::Confirm::new(&confirmation_question(axis, request))
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow::anyhow!("用户交互失败: {}", e))
}
