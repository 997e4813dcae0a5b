//! 会话级集成测试（脚本化命令链路，无硬件）

use servo_control::console::{self, Event};
use servo_control::{
    ConfirmationOutcome, ConsoleConfig, ConsoleNotice, ControllerSession, LoopExit,
    OperatorCommand, PositionDisplay, SessionError, SetpointField, SetpointPhase,
};
use servo_driver::{ConsoleEvent, JogDirection, PollingEngine, TelemetryEvent};
use servo_protocol::{AxisAction, AxisCalibration, AxisId};
use servo_transport::{ScriptedLink, Transport, TransportConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn config() -> ConsoleConfig {
    let mut config = ConsoleConfig::with_transport(TransportConfig::Direct {
        address: "127.0.0.1".into(),
        timeout: Duration::from_millis(100),
    });
    config.axes = [AxisCalibration::new(0.0, 180.0, 500.0, 4.0); AxisId::COUNT];
    config.polling.period_ms = 5;
    config.polling.reply_timeout_ms = 5;
    config
}

fn scripted_session() -> (ScriptedLink, ControllerSession) {
    let link = ScriptedLink::new();
    let transport = Transport::from_link(Box::new(link.clone()));
    let session = ControllerSession::new(&config(), Some(Arc::new(transport)));
    (link, session)
}

fn position(axis: AxisId, deg: f64) -> TelemetryEvent {
    TelemetryEvent {
        position_deg: Some(deg),
        raw_position_reply: Some(format!("{deg:.4}")),
        ..TelemetryEvent::absent(axis)
    }
}

#[test]
fn interlock_stops_once_and_recovers_once() {
    let (link, mut session) = scripted_session();
    for deg in [10.0, 185.0, 185.0, 90.0] {
        session.handle_telemetry(&position(AxisId::A, deg));
    }

    assert_eq!(link.count("STA"), 1);
    let notices = session.take_notices();
    let tripped: Vec<_> = notices
        .iter()
        .filter(|n| matches!(n, ConsoleNotice::LimitTripped { .. }))
        .collect();
    let cleared = notices
        .iter()
        .filter(|n| matches!(n, ConsoleNotice::LimitCleared { .. }))
        .count();
    assert_eq!(
        tripped,
        vec![&ConsoleNotice::LimitTripped {
            axis: AxisId::A,
            position: 185.0,
            stop_sent: true,
        }]
    );
    assert_eq!(cleared, 1);
    assert!(!session.state(AxisId::A).limit_tripped);
}

#[test]
fn unavailable_marker_after_five_misses() {
    let (_link, mut session) = scripted_session();
    session.handle_telemetry(&position(AxisId::B, 45.0));
    session.take_notices();

    for miss in 1..=6 {
        session.handle_telemetry(&TelemetryEvent::absent(AxisId::B));
        let marked = session
            .take_notices()
            .iter()
            .filter(|n| matches!(n, ConsoleNotice::PositionUnavailable { .. }))
            .count();
        assert_eq!(marked, usize::from(miss == 5), "miss {miss}");
        let expected = if miss < 5 {
            PositionDisplay::Value(45.0)
        } else {
            PositionDisplay::Unavailable
        };
        assert_eq!(session.state(AxisId::B).position_display(), expected);
    }
}

#[test]
fn confirmed_absolute_position_is_encoded_in_pulses() {
    let (link, mut session) = scripted_session();
    let field = SetpointField::AbsolutePosition;

    session.edit_setpoint(AxisId::A, field, "90");
    let request = session.request_confirmation(AxisId::A, field).unwrap();
    assert_eq!(request.value, 90.0);
    assert!(link.sent().is_empty());

    let outcome = session.complete_confirmation(AxisId::A, field, true).unwrap();
    assert_eq!(
        outcome,
        ConfirmationOutcome::Sent {
            value: 90.0,
            reply: None
        }
    );
    assert_eq!(link.sent(), vec!["PAA=180000"]);

    let setpoint = session.state(AxisId::A).setpoints.field(field);
    assert_eq!(setpoint.last_confirmed(), Some(90.0));
    assert_eq!(setpoint.phase(), SetpointPhase::Idle);
}

#[test]
fn out_of_range_value_never_reaches_the_link() {
    let (link, mut session) = scripted_session();
    let field = SetpointField::AbsolutePosition;

    session.edit_setpoint(AxisId::C, field, "200");
    let err = session.request_confirmation(AxisId::C, field).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert!(session.complete_confirmation(AxisId::C, field, true).is_err());
    assert!(link.sent().is_empty());
}

#[test]
fn declining_restores_previous_value() {
    let (link, mut session) = scripted_session();
    let field = SetpointField::Speed;

    session.edit_setpoint(AxisId::A, field, "30");
    session.request_confirmation(AxisId::A, field).unwrap();
    session.complete_confirmation(AxisId::A, field, true).unwrap();

    session.edit_setpoint(AxisId::A, field, "60");
    session.request_confirmation(AxisId::A, field).unwrap();
    let outcome = session.complete_confirmation(AxisId::A, field, false).unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Declined { restored: Some(30.0) });
    assert_eq!(
        session.state(AxisId::A).setpoints.field(field).display_value(),
        Some(30.0)
    );
    assert_eq!(link.sent(), vec!["SPA=60000"]);
}

#[test]
fn transport_failure_leaves_setpoint_failed_without_retry() {
    let (link, mut session) = scripted_session();
    let field = SetpointField::Accel;
    link.set_failing(true);

    session.edit_setpoint(AxisId::D, field, "100");
    session.request_confirmation(AxisId::D, field).unwrap();
    let err = session.complete_confirmation(AxisId::D, field, true).unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));

    let setpoint = session.state(AxisId::D).setpoints.field(field);
    assert_eq!(setpoint.phase(), SetpointPhase::Failed);
    assert_eq!(setpoint.last_confirmed(), None);
    assert_eq!(link.count("ACD=200000"), 1);

    // 只有操作员再次确认才会重发
    link.set_failing(false);
    session.request_confirmation(AxisId::D, field).unwrap();
    session.complete_confirmation(AxisId::D, field, true).unwrap();
    assert_eq!(link.count("ACD=200000"), 2);
}

#[test]
fn enable_refreshes_status_immediately() {
    let (link, mut session) = scripted_session();
    link.reply_always("MG _MOE", "0.0000");

    session.send_motion(AxisId::E, AxisAction::Enable).unwrap();
    assert_eq!(link.sent(), vec!["SHE", "MG _MOE"]);
    assert!(session.state(AxisId::E).enabled);
    assert!(session
        .take_notices()
        .contains(&ConsoleNotice::EnabledChanged {
            axis: AxisId::E,
            enabled: true
        }));
}

#[test]
fn jog_respects_soft_limits() {
    let (link, mut session) = scripted_session();
    session.edit_setpoint(AxisId::A, SetpointField::Speed, "100");

    session.handle_telemetry(&position(AxisId::A, 180.0));
    let err = session.jog(AxisId::A, JogDirection::Positive).unwrap_err();
    assert!(matches!(err, SessionError::JogRejected { .. }));
    assert!(link.sent().is_empty());

    session.handle_telemetry(&position(AxisId::A, 0.0));
    let speed = session.jog(AxisId::A, JogDirection::Negative).unwrap();
    assert_eq!(speed, -36.0);
    assert_eq!(link.sent(), vec!["JGA=-72000;BGA"]);

    session.release_jog(AxisId::A).unwrap();
    assert_eq!(link.sent().last().map(String::as_str), Some("STA"));
}

#[test]
fn jog_without_speed_is_rejected() {
    let (link, mut session) = scripted_session();
    assert!(session.jog(AxisId::A, JogDirection::Positive).is_err());
    assert!(link.sent().is_empty());
    assert!(session
        .take_notices()
        .iter()
        .any(|n| matches!(n, ConsoleNotice::Rejected { .. })));
}

#[test]
fn degraded_session_keeps_running() {
    let mut session = ControllerSession::new(&config(), None);
    assert!(session.is_degraded());

    assert!(matches!(
        session.send_motion(AxisId::A, AxisAction::Start),
        Err(SessionError::CommunicationsUnavailable)
    ));
    session.handle_telemetry(&position(AxisId::A, 190.0));
    assert!(session.take_notices().contains(&ConsoleNotice::LimitTripped {
        axis: AxisId::A,
        position: 190.0,
        stop_sent: false,
    }));
    assert!(session.state(AxisId::A).limit_tripped);
    session.close();
}

#[test]
fn control_loop_processes_operator_commands() {
    let (link, mut session) = scripted_session();
    let (tx, rx) = crossbeam_channel::unbounded::<Event>();

    tx.send(ConsoleEvent::Operator(OperatorCommand::SelectAxis(AxisId::B)))
        .unwrap();
    tx.send(ConsoleEvent::Operator(OperatorCommand::Zero)).unwrap();
    tx.send(ConsoleEvent::Operator(OperatorCommand::Edit {
        field: SetpointField::Speed,
        text: "10".into(),
    }))
    .unwrap();
    tx.send(ConsoleEvent::JogPressed {
        axis: AxisId::B,
        direction: JogDirection::Positive,
    })
    .unwrap();
    tx.send(ConsoleEvent::JogReleased { axis: AxisId::B }).unwrap();
    tx.send(ConsoleEvent::Operator(OperatorCommand::Status)).unwrap();
    tx.send(ConsoleEvent::Operator(OperatorCommand::Quit)).unwrap();

    let shutdown = AtomicBool::new(false);
    let mut notices = Vec::new();
    let exit = console::run(
        &mut session,
        &rx,
        &shutdown,
        Duration::from_millis(10),
        |n| notices.push(n),
    );

    assert_eq!(exit, LoopExit::Quit);
    assert_eq!(session.selected_axis(), AxisId::B);
    assert_eq!(link.sent(), vec!["DP ,0,,,,,,", "JGB=20000;BGB", "STB"]);
    assert!(notices.iter().any(|n| matches!(n, ConsoleNotice::Status(s) if s.axis == AxisId::B)));
}

#[test]
fn polling_engine_feeds_control_loop() {
    let (link, mut session) = scripted_session();
    link.reply_always("MG _RPA", "12.5000");
    link.reply_always("MG _MOA", "1.0000");

    let (tx, rx) = crossbeam_channel::unbounded::<Event>();
    let engine = PollingEngine::spawn(
        session.transport().cloned(),
        session.selection(),
        tx,
        config().polling.polling_config(),
    )
    .unwrap();

    let shutdown = AtomicBool::new(false);
    let mut seen = None;
    let exit = console::run(
        &mut session,
        &rx,
        &shutdown,
        Duration::from_millis(10),
        |n| {
            if let ConsoleNotice::Telemetry { position, .. } = n {
                seen = Some(position);
                shutdown.store(true, Ordering::Release);
            }
        },
    );

    engine.shutdown().unwrap();
    assert_eq!(exit, LoopExit::Interrupted);
    assert_eq!(seen, Some(PositionDisplay::Value(12.5)));
    assert!(!session.state(AxisId::A).enabled);
}

/// 回环 UDP 设备：动作命令回 `OK`，状态查询回当前使能状态
fn spawn_udp_device(device: std::net::UdpSocket) -> std::thread::JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        device
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut enabled = false;
        let mut received = Vec::new();
        let mut buf = [0u8; 128];
        while let Ok((n, from)) = device.recv_from(&mut buf) {
            let command = String::from_utf8_lossy(&buf[..n]).to_string();
            let reply = match command.as_str() {
                "ENABLE_SERVO_1" => {
                    enabled = true;
                    "OK"
                },
                "DISABLE_SERVO_1" => {
                    enabled = false;
                    "OK"
                },
                "MG _MOA" if enabled => "0.0000",
                "MG _MOA" => "1.0000",
                _ => "OK",
            };
            device.send_to(reply.as_bytes(), from).unwrap();
            received.push(command);
        }
        received
    })
}

#[test]
fn enable_status_survives_command_ack_on_datagram() {
    let device = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let remote = device.local_addr().unwrap().to_string();
    let server = spawn_udp_device(device);

    let mut config = ConsoleConfig::with_transport(TransportConfig::Datagram {
        remote,
        local: "127.0.0.1:0".into(),
    });
    config.polling.reply_timeout_ms = 50;
    let (mut session, init_error) = ControllerSession::connect(&config);
    assert!(init_error.is_none());

    session.send_motion(AxisId::A, AxisAction::Enable).unwrap();
    assert!(session.state(AxisId::A).enabled);
    assert!(session.take_notices().contains(&ConsoleNotice::EnabledChanged {
        axis: AxisId::A,
        enabled: true,
    }));

    session.send_motion(AxisId::A, AxisAction::Disable).unwrap();
    assert!(!session.state(AxisId::A).enabled);

    session.close();
    assert_eq!(
        server.join().unwrap(),
        vec!["ENABLE_SERVO_1", "MG _MOA", "DISABLE_SERVO_1", "MG _MOA"]
    );
}
