//! 控制循环
//!
//! 单线程逐个处理事件：遥测、点动按下/松开、操作员命令。
//! 通道空闲时由定时 tick 唤醒以检查停止标志，单次处理不会长时间阻塞。

use crate::session::{ControllerSession, ConsoleNotice, OperatorCommand};
use crossbeam_channel::{Receiver, select, tick};
use servo_driver::ConsoleEvent;
use servo_protocol::AxisAction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// 控制循环的事件类型
pub type Event = ConsoleEvent<OperatorCommand>;

/// 默认 UI tick
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// 单个事件处理后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// 控制循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// 操作员退出或收到 `Shutdown` 事件
    Quit,
    /// 外部停止标志（Ctrl-C）
    Interrupted,
    /// 所有发送端已关闭
    Disconnected,
}

/// 处理一个事件
///
/// 错误已经以通知形式记录在会话中，这里只记录调试日志。
pub fn handle_event(session: &mut ControllerSession, event: Event) -> Flow {
    let axis = session.selected_axis();
    let result = match event {
        ConsoleEvent::Telemetry(telemetry) => {
            session.handle_telemetry(&telemetry);
            Ok(())
        },
        ConsoleEvent::JogPressed { axis, direction } => session.jog(axis, direction).map(|_| ()),
        ConsoleEvent::JogReleased { axis } => session.release_jog(axis),
        ConsoleEvent::Shutdown => return Flow::Quit,
        ConsoleEvent::Operator(command) => match command {
            OperatorCommand::SelectAxis(next) => {
                session.select_axis(next);
                Ok(())
            },
            OperatorCommand::Enable => session.send_motion(axis, AxisAction::Enable).map(|_| ()),
            OperatorCommand::Disable => session.send_motion(axis, AxisAction::Disable).map(|_| ()),
            OperatorCommand::Start => session.send_motion(axis, AxisAction::Start).map(|_| ()),
            OperatorCommand::Stop => session.send_motion(axis, AxisAction::Stop).map(|_| ()),
            OperatorCommand::Zero => session
                .send_motion(axis, AxisAction::ZeroPosition)
                .map(|_| ()),
            OperatorCommand::Edit { field, text } => {
                session.edit_setpoint(axis, field, &text);
                Ok(())
            },
            OperatorCommand::RequestConfirmation(field) => {
                session.request_confirmation(axis, field).map(|_| ())
            },
            OperatorCommand::AnswerConfirmation { field, accepted } => session
                .complete_confirmation(axis, field, accepted)
                .map(|_| ()),
            OperatorCommand::Cancel(field) => {
                session.cancel_setpoint(axis, field);
                Ok(())
            },
            OperatorCommand::Status => {
                session.report_status();
                Ok(())
            },
            OperatorCommand::Probe => session.probe().map(|_| ()),
            OperatorCommand::Quit => return Flow::Quit,
        },
    };

    if let Err(e) = result {
        debug!("Event on axis {} not completed: {}", axis, e);
    }
    Flow::Continue
}

/// 运行控制循环直到退出
///
/// 每处理一个事件后把会话通知交给 `sink`（显示层）。
pub fn run<F>(
    session: &mut ControllerSession,
    events: &Receiver<Event>,
    shutdown: &AtomicBool,
    tick_period: Duration,
    mut sink: F,
) -> LoopExit
where
    F: FnMut(ConsoleNotice),
{
    let ticker = tick(tick_period);
    let exit = loop {
        if shutdown.load(Ordering::Acquire) {
            break LoopExit::Interrupted;
        }

        let flow = select! {
            recv(events) -> msg => match msg {
                Ok(event) => handle_event(session, event),
                Err(_) => {
                    for notice in session.take_notices() {
                        sink(notice);
                    }
                    break LoopExit::Disconnected;
                },
            },
            recv(ticker) -> _ => Flow::Continue,
        };

        for notice in session.take_notices() {
            sink(notice);
        }

        if flow == Flow::Quit {
            break LoopExit::Quit;
        }
    };

    info!("Control loop exited: {:?}", exit);
    exit
}
