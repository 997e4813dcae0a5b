//! Shell 模式（交互式）
//!
//! 三个线程：
//! - 主线程运行控制循环，独占会话
//! - 轮询线程（`PollingEngine`）送回遥测事件
//! - 输入线程用 rustyline 读取命令，转成事件送入同一通道
//!
//! 设定值确认：输入线程发出确认请求后等待提示通道，
//! 控制循环把校验结果经提示通道送回，再由输入线程用 inquire 询问操作员。

use crate::display;
use crate::parse::{ShellLine, parse_line};
use crate::utils::{confirm_setpoint, report_init_error};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use servo_control::console::{self, Event, LoopExit};
use servo_control::{
    ConfirmationRequest, ConsoleConfig, ConsoleNotice, ControllerSession, OperatorCommand,
    SetpointField,
};
use servo_driver::{AxisSelection, ConsoleEvent, PollingEngine};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const HISTORY_FILE: &str = ".servo_history";

/// 等待控制循环回应确认请求的时间
const PROMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// 控制循环回给输入线程的确认结果
#[derive(Debug, Clone, PartialEq)]
pub enum PromptEvent {
    Confirm(ConfirmationRequest),
    Rejected,
}

impl PromptEvent {
    fn from_notice(notice: &ConsoleNotice) -> Option<Self> {
        match notice {
            ConsoleNotice::ConfirmationRequired { request, .. } => {
                Some(PromptEvent::Confirm(*request))
            },
            ConsoleNotice::ConfirmationRejected { .. } => Some(PromptEvent::Rejected),
            _ => None,
        }
    }
}

/// Shell 输入（专用输入线程）
pub struct ShellInput {
    _input_thread: thread::JoinHandle<()>,
}

impl ShellInput {
    pub fn spawn(
        events: Sender<Event>,
        prompts: Receiver<PromptEvent>,
        selection: Arc<AxisSelection>,
    ) -> Result<Self> {
        let input_thread = thread::Builder::new()
            .name("servo-input".into())
            .spawn(move || {
                if let Err(e) = input_loop(&events, &prompts, &selection) {
                    eprintln!("❌ 输入线程错误: {}", e);
                    let _ = events.send(ConsoleEvent::Shutdown);
                }
            })
            .context("启动输入线程失败")?;

        Ok(Self {
            _input_thread: input_thread,
        })
    }
}

fn input_loop(
    events: &Sender<Event>,
    prompts: &Receiver<PromptEvent>,
    selection: &AxisSelection,
) -> Result<()> {
    let mut rl = DefaultEditor::new().context("初始化 readline 失败")?;
    rl.load_history(HISTORY_FILE).ok(); // 首次运行没有历史

    println!("Servo CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
    println!("输入 'help' 查看帮助，'quit' 退出");
    println!();

    loop {
        let prompt = format!("servo[{}]> ", selection.get());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let delivered = match parse_line(line, selection.get()) {
                    Ok(ShellLine::Event(event)) => events.send(event).is_ok(),
                    Ok(ShellLine::Confirm(field)) => confirm(events, prompts, selection, field),
                    Ok(ShellLine::Help) => {
                        print_help();
                        true
                    },
                    Ok(ShellLine::Exit) => {
                        let _ = events.send(ConsoleEvent::Operator(OperatorCommand::Quit));
                        break;
                    },
                    Err(e) => {
                        eprintln!("❌ {}", e);
                        eprintln!("💡 提示: 输入 'help' 查看所有命令");
                        true
                    },
                };
                if !delivered {
                    break; // 控制循环已退出
                }
            },

            Err(ReadlineError::Interrupted) => {
                println!("^C");
                let _ = events.send(ConsoleEvent::Shutdown);
                break;
            },

            Err(ReadlineError::Eof) => {
                let _ = events.send(ConsoleEvent::Operator(OperatorCommand::Quit));
                break;
            },

            Err(err) => {
                rl.save_history(HISTORY_FILE).ok();
                return Err(err.into());
            },
        }
    }

    rl.save_history(HISTORY_FILE).ok();
    Ok(())
}

/// 请求确认并询问操作员；控制循环已退出时返回 `false`
fn confirm(
    events: &Sender<Event>,
    prompts: &Receiver<PromptEvent>,
    selection: &AxisSelection,
    field: SetpointField,
) -> bool {
    // 丢弃之前的遗留结果
    while prompts.try_recv().is_ok() {}

    let request = ConsoleEvent::Operator(OperatorCommand::RequestConfirmation(field));
    if events.send(request).is_err() {
        return false;
    }

    match prompts.recv_timeout(PROMPT_TIMEOUT) {
        Ok(PromptEvent::Confirm(request)) => {
            let accepted = confirm_setpoint(selection.get(), &request).unwrap_or_else(|e| {
                eprintln!("⚠️  {}，视为拒绝", e);
                false
            });
            let answer = OperatorCommand::AnswerConfirmation { field, accepted };
            events.send(ConsoleEvent::Operator(answer)).is_ok()
        },
        // 拒绝原因已由显示层打印
        Ok(PromptEvent::Rejected) => true,
        Err(RecvTimeoutError::Timeout) => {
            eprintln!("⚠️  等待确认超时");
            true
        },
        Err(RecvTimeoutError::Disconnected) => false,
    }
}

/// 运行 Shell 模式
pub fn run_shell(config: &ConsoleConfig, shutdown: &AtomicBool) -> Result<()> {
    let (mut session, init_error) = ControllerSession::connect(config);
    if let Some(e) = init_error {
        eprintln!("⚠️  {}", e);
        report_init_error(&config.transport);
        eprintln!("⚠️  无控制器通信，界面继续运行（命令不会发送）");
    }

    let (event_tx, event_rx) = unbounded::<Event>();
    let (prompt_tx, prompt_rx) = bounded::<PromptEvent>(4);

    let engine = PollingEngine::spawn(
        session.transport().cloned(),
        session.selection(),
        event_tx.clone(),
        config.polling.polling_config(),
    )
    .context("启动轮询线程失败")?;
    let _input = ShellInput::spawn(event_tx, prompt_rx, session.selection())?;

    let exit = console::run(
        &mut session,
        &event_rx,
        shutdown,
        console::DEFAULT_TICK,
        |notice| {
            if let Some(prompt) = PromptEvent::from_notice(&notice)
                && prompt_tx.try_send(prompt).is_err()
            {
                warn!("Prompt channel full, dropping confirmation result");
            }
            // 遥测只在 status 中显示，避免刷屏
            if matches!(notice, ConsoleNotice::Telemetry { .. }) {
                return;
            }
            if let Some(line) = display::render(&notice) {
                println!("{}", line);
            }
        },
    );

    info!("Shell exited: {:?}", exit);
    engine.shutdown().context("停止轮询线程失败")?;
    session.close();

    match exit {
        LoopExit::Interrupted => println!("🛑 已中断"),
        LoopExit::Quit | LoopExit::Disconnected => println!("👋 再见！"),
    }
    Ok(())
}

/// 打印帮助信息
fn print_help() {
    println!("可用命令（作用于当前轴）:");
    println!("  axis <A-H|1-8>                选择轴");
    println!("  enable | disable              使能 / 断使能");
    println!("  start | stop                  启动 / 停止运动");
    println!("  zero                          当前位置置零");
    println!("  jog <+|->                     按速度字段点动");
    println!("  release                       结束点动（停止）");
    println!("  set <field> <value>           修改设定值（speed accel decel abs rel）");
    println!("  ok <field>                    确认并发送设定值");
    println!("  cancel <field>                放弃修改");
    println!("  status                        显示当前轴状态");
    println!("  probe                         读取控制器版本");
    println!("  help                          显示帮助");
    println!("  quit / exit                   退出");
    println!();
    println!("快捷键:");
    println!("  Ctrl+C                        中断并退出");
    println!("  Ctrl+D                        退出");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_protocol::AxisId;

    #[test]
    fn test_prompt_event_from_notice() {
        let request = ConfirmationRequest {
            field: SetpointField::AbsolutePosition,
            value: 90.0,
            current_position: None,
            target_position: None,
        };
        assert_eq!(
            PromptEvent::from_notice(&ConsoleNotice::ConfirmationRequired {
                axis: AxisId::A,
                request,
            }),
            Some(PromptEvent::Confirm(request))
        );
        assert_eq!(
            PromptEvent::from_notice(&ConsoleNotice::ConfirmationRejected {
                axis: AxisId::A,
                field: SetpointField::AbsolutePosition,
                reason: "out of range".into(),
            }),
            Some(PromptEvent::Rejected)
        );
        assert_eq!(
            PromptEvent::from_notice(&ConsoleNotice::AxisSelected(AxisId::B)),
            None
        );
    }

    #[test]
    fn test_rejected_request_sends_no_answer() {
        let (event_tx, event_rx) = unbounded::<Event>();
        let (prompt_tx, prompt_rx) = bounded::<PromptEvent>(4);
        let selection = AxisSelection::default();

        // 遗留结果会被丢弃；拒绝时不再发送回答
        prompt_tx.send(PromptEvent::Confirm(ConfirmationRequest {
            field: SetpointField::Speed,
            value: 1.0,
            current_position: None,
            target_position: None,
        }))
        .unwrap();
        let responder = thread::spawn(move || {
            let first = event_rx.recv().unwrap();
            prompt_tx.send(PromptEvent::Rejected).unwrap();
            (first, event_rx)
        });

        assert!(confirm(&event_tx, &prompt_rx, &selection, SetpointField::Speed));
        let (first, event_rx) = responder.join().unwrap();
        assert_eq!(
            first,
            ConsoleEvent::Operator(OperatorCommand::RequestConfirmation(SetpointField::Speed))
        );
        assert!(event_rx.try_recv().is_err());
    }
}
