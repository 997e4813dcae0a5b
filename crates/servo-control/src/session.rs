//! 控制器会话
//!
//! 持有传输、全部轴的标定与运行时状态，以及当前选中轴。
//! 所有状态只在控制循环线程上修改；与轮询线程共享的只有传输与轴选择。

use crate::config::{ConsoleConfig, MotionLimits};
use crate::interlock::{self, InterlockTransition, JogDecision};
use crate::runtime::{AxisRuntimeState, PositionDisplay};
use crate::setpoint::{
    ConfirmationOutcome, ConfirmationRequest, SetpointController, SetpointError, SetpointField,
};
use servo_driver::{AxisSelection, JogDirection, TelemetryEvent};
use servo_protocol::{
    AxisAction, AxisCalibration, AxisId, CommandEncoder, PROBE_COMMAND, ProtocolError,
    ServoStatus, TelemetryQuery, extract_numeric,
};
use servo_transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 状态刷新与探测时等待回复的最大次数
const STATUS_REFRESH_ATTEMPTS: u32 = 10;

/// 会话层错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Validation(#[from] SetpointError),

    #[error("Jog rejected: axis {axis} is at {position:.1}, upper limit {max:.1}")]
    JogRejected {
        axis: AxisId,
        position: f64,
        max: f64,
    },

    #[error("Controller communications not initialized")]
    CommunicationsUnavailable,
}

/// 操作员命令（作用于当前选中轴）
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    SelectAxis(AxisId),
    Enable,
    Disable,
    Start,
    Stop,
    Zero,
    Edit { field: SetpointField, text: String },
    RequestConfirmation(SetpointField),
    AnswerConfirmation { field: SetpointField, accepted: bool },
    Cancel(SetpointField),
    Status,
    Probe,
    Quit,
}

/// 单轴快照（供显示层使用）
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSnapshot {
    pub axis: AxisId,
    pub position: PositionDisplay,
    pub enabled: bool,
    pub limit_tripped: bool,
    pub torque: Option<f64>,
    pub speed: Option<f64>,
    pub calibration: AxisCalibration,
    /// 各字段显示值与是否待确认
    pub setpoints: Vec<(SetpointField, Option<f64>, bool)>,
}

/// 发给显示层的通知
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleNotice {
    Telemetry {
        axis: AxisId,
        position: PositionDisplay,
        raw_reply: Option<String>,
        torque: Option<f64>,
        speed: Option<f64>,
        enabled: bool,
    },
    PositionUnavailable { axis: AxisId },
    EnabledChanged { axis: AxisId, enabled: bool },
    LimitTripped {
        axis: AxisId,
        position: f64,
        stop_sent: bool,
    },
    LimitCleared { axis: AxisId, position: f64 },
    CommandSent {
        axis: AxisId,
        command: String,
        reply: Option<String>,
    },
    CommandFailed {
        axis: AxisId,
        command: String,
        error: String,
    },
    Rejected { axis: AxisId, reason: String },
    JogCapped {
        axis: AxisId,
        requested: f64,
        speed: f64,
    },
    SetpointEdited {
        axis: AxisId,
        field: SetpointField,
        value: Option<f64>,
    },
    ConfirmationRequired { axis: AxisId, request: ConfirmationRequest },
    ConfirmationRejected {
        axis: AxisId,
        field: SetpointField,
        reason: String,
    },
    SetpointConfirmed {
        axis: AxisId,
        field: SetpointField,
        value: f64,
    },
    SetpointRestored {
        axis: AxisId,
        field: SetpointField,
        value: Option<f64>,
    },
    AxisSelected(AxisId),
    Status(AxisSnapshot),
    ProbeReply(Option<String>),
}

/// 控制器会话
pub struct ControllerSession {
    transport: Option<Arc<Transport>>,
    encoder: CommandEncoder,
    calibrations: [AxisCalibration; AxisId::COUNT],
    limits: MotionLimits,
    states: [AxisRuntimeState; AxisId::COUNT],
    selection: Arc<AxisSelection>,
    unavailable_after: u32,
    reply_timeout: Duration,
    notices: Vec<ConsoleNotice>,
}

impl ControllerSession {
    /// 使用已建立（或缺失）的传输创建会话
    pub fn new(config: &ConsoleConfig, transport: Option<Arc<Transport>>) -> Self {
        Self {
            transport,
            encoder: CommandEncoder::new(config.dialect),
            calibrations: config.axes,
            limits: config.limits.clone(),
            states: Default::default(),
            selection: Arc::new(AxisSelection::default()),
            unavailable_after: config.polling.unavailable_after,
            reply_timeout: Duration::from_millis(config.polling.reply_timeout_ms),
            notices: Vec::new(),
        }
    }

    /// 按配置建立连接；失败时进入降级模式并返回错误供显示
    pub fn connect(config: &ConsoleConfig) -> (Self, Option<TransportError>) {
        match Transport::open(&config.transport) {
            Ok(transport) => (Self::new(config, Some(Arc::new(transport))), None),
            Err(e) => {
                warn!("{}; continuing without controller communications", e);
                (Self::new(config, None), Some(e))
            },
        }
    }

    pub fn transport(&self) -> Option<&Arc<Transport>> {
        self.transport.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.transport.is_none()
    }

    /// 与轮询线程共享的轴选择
    pub fn selection(&self) -> Arc<AxisSelection> {
        self.selection.clone()
    }

    pub fn selected_axis(&self) -> AxisId {
        self.selection.get()
    }

    pub fn select_axis(&mut self, axis: AxisId) {
        if self.selection.set(axis) != axis {
            debug!("Selected axis {}", axis);
        }
        self.notices.push(ConsoleNotice::AxisSelected(axis));
    }

    pub fn state(&self, axis: AxisId) -> &AxisRuntimeState {
        &self.states[axis.index()]
    }

    pub fn calibration(&self, axis: AxisId) -> &AxisCalibration {
        &self.calibrations[axis.index()]
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    /// 取走累积的通知
    pub fn take_notices(&mut self) -> Vec<ConsoleNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self, axis: AxisId) -> AxisSnapshot {
        let state = self.state(axis);
        AxisSnapshot {
            axis,
            position: state.position_display(),
            enabled: state.enabled,
            limit_tripped: state.limit_tripped,
            torque: state.torque,
            speed: state.speed,
            calibration: *self.calibration(axis),
            setpoints: SetpointField::ALL
                .iter()
                .map(|&f| {
                    let field = state.setpoints.field(f);
                    (f, field.display_value(), field.is_highlighted())
                })
                .collect(),
        }
    }

    /// 处理一次遥测事件：位置计数、联锁、使能状态
    pub fn handle_telemetry(&mut self, event: &TelemetryEvent) {
        let axis = event.axis;
        let calibration = self.calibrations[axis.index()];
        let unavailable_after = self.unavailable_after;

        let state = &mut self.states[axis.index()];
        if state.record_position(event.position_deg, unavailable_after) {
            warn!(
                "Axis {}: {} consecutive invalid position replies",
                axis, state.consecutive_invalid_responses
            );
            self.notices.push(ConsoleNotice::PositionUnavailable { axis });
        }
        state.torque = event.torque;
        state.speed = event.speed;

        if let Some(enabled) = event.status.and_then(|v| ServoStatus::classify(v).enabled())
            && state.enabled != enabled
        {
            state.enabled = enabled;
            self.notices
                .push(ConsoleNotice::EnabledChanged { axis, enabled });
        }

        let transition = event
            .position_deg
            .and_then(|p| interlock::evaluate(&mut self.states[axis.index()], &calibration, p));
        match transition {
            Some(InterlockTransition::Tripped { position }) => {
                warn!(
                    "Axis {} at {:.1} is outside [{}, {}], stopping",
                    axis, position, calibration.min_degrees, calibration.max_degrees
                );
                let stop_sent = self.dispatch(axis, AxisAction::Stop).is_ok();
                self.notices.push(ConsoleNotice::LimitTripped {
                    axis,
                    position,
                    stop_sent,
                });
            },
            Some(InterlockTransition::Recovered { position }) => {
                info!("Axis {} back within limits at {:.1}", axis, position);
                self.notices
                    .push(ConsoleNotice::LimitCleared { axis, position });
            },
            None => {},
        }

        let state = &self.states[axis.index()];
        self.notices.push(ConsoleNotice::Telemetry {
            axis,
            position: state.position_display(),
            raw_reply: event.raw_position_reply.clone(),
            torque: state.torque,
            speed: state.speed,
            enabled: state.enabled,
        });
    }

    /// 单次动作命令（使能/断使能/启动/停止/置零），绕过确认流程
    pub fn send_motion(
        &mut self,
        axis: AxisId,
        action: AxisAction,
    ) -> Result<Option<String>, SessionError> {
        let reply = self.dispatch(axis, action)?;
        if matches!(action, AxisAction::Enable | AxisAction::Disable) {
            self.refresh_status(axis);
        }
        Ok(reply)
    }

    /// 点动：速度取自速度字段（未确认的输入优先），经过软限位预检
    pub fn jog(&mut self, axis: AxisId, direction: JogDirection) -> Result<f64, SessionError> {
        let state = &self.states[axis.index()];
        let position = state.last_valid_position_deg;
        let Some(live_speed) = state.setpoints.live_speed() else {
            let err = SessionError::from(SetpointError::MissingValue(SetpointField::Speed));
            self.reject(axis, &err);
            return Err(err);
        };
        let requested = live_speed.abs().min(self.limits.max_speed) * direction.sign();
        if position.is_none() {
            warn!("Axis {}: jogging with unknown position", axis);
        }

        let calibration = self.calibrations[axis.index()];
        let speed = match interlock::check_jog(&calibration, &self.limits, position, requested) {
            JogDecision::Allowed { speed } => speed,
            JogDecision::Capped { requested, speed } => {
                warn!(
                    "Axis {}: jog speed {:.1} capped to {:.1} at lower limit",
                    axis, requested, speed
                );
                self.notices.push(ConsoleNotice::JogCapped {
                    axis,
                    requested,
                    speed,
                });
                speed
            },
            JogDecision::Rejected { position, max } => {
                let err = SessionError::JogRejected {
                    axis,
                    position,
                    max,
                };
                self.reject(axis, &err);
                return Err(err);
            },
        };

        self.dispatch(axis, AxisAction::Jog { speed_deg_s: speed })?;
        Ok(speed)
    }

    /// 松开点动：停止该轴
    pub fn release_jog(&mut self, axis: AxisId) -> Result<(), SessionError> {
        self.dispatch(axis, AxisAction::Stop).map(|_| ())
    }

    pub fn edit_setpoint(&mut self, axis: AxisId, field: SetpointField, text: &str) -> Option<f64> {
        let calibration = self.calibrations[axis.index()];
        let ctl = SetpointController::new(&calibration, &self.limits);
        let value = ctl.edit(&mut self.states[axis.index()].setpoints, field, text);
        self.notices
            .push(ConsoleNotice::SetpointEdited { axis, field, value });
        value
    }

    /// 校验并进入等待确认
    pub fn request_confirmation(
        &mut self,
        axis: AxisId,
        field: SetpointField,
    ) -> Result<ConfirmationRequest, SessionError> {
        let calibration = self.calibrations[axis.index()];
        let ctl = SetpointController::new(&calibration, &self.limits);
        let state = &mut self.states[axis.index()];
        let position = state.last_valid_position_deg;
        match ctl.request_confirmation(&mut state.setpoints, field, position) {
            Ok(request) => {
                self.notices
                    .push(ConsoleNotice::ConfirmationRequired { axis, request });
                Ok(request)
            },
            Err(e) => {
                warn!("Axis {} {}: {}", axis, field, e);
                self.notices.push(ConsoleNotice::ConfirmationRejected {
                    axis,
                    field,
                    reason: e.to_string(),
                });
                Err(e.into())
            },
        }
    }

    /// 操作员回答确认提示
    ///
    /// 接受时编码并发送；发送失败时字段进入失败状态，不会自动重试。
    pub fn complete_confirmation(
        &mut self,
        axis: AxisId,
        field: SetpointField,
        accepted: bool,
    ) -> Result<ConfirmationOutcome, SessionError> {
        let calibration = self.calibrations[axis.index()];
        let limits = self.limits.clone();
        let ctl = SetpointController::new(&calibration, &limits);

        if !accepted {
            let outcome = ctl.decline(&mut self.states[axis.index()].setpoints, field);
            if let ConfirmationOutcome::Declined { restored } = outcome {
                self.notices.push(ConsoleNotice::SetpointRestored {
                    axis,
                    field,
                    value: restored,
                });
            }
            return Ok(outcome);
        }

        let value = match ctl.accepted_value(&self.states[axis.index()].setpoints, field) {
            Ok(value) => value,
            Err(e) => {
                self.notices.push(ConsoleNotice::ConfirmationRejected {
                    axis,
                    field,
                    reason: e.to_string(),
                });
                return Err(e.into());
            },
        };
        match self.dispatch(axis, field.action(value)) {
            Ok(reply) => {
                ctl.mark_sent(&mut self.states[axis.index()].setpoints, field, value);
                self.notices.push(ConsoleNotice::SetpointConfirmed { axis, field, value });
                Ok(ConfirmationOutcome::Sent { value, reply })
            },
            Err(e) => {
                ctl.mark_failed(&mut self.states[axis.index()].setpoints, field);
                Err(e)
            },
        }
    }

    /// 取消编辑
    pub fn cancel_setpoint(&mut self, axis: AxisId, field: SetpointField) -> Option<f64> {
        let calibration = self.calibrations[axis.index()];
        let ctl = SetpointController::new(&calibration, &self.limits);
        let value = ctl.cancel(&mut self.states[axis.index()].setpoints, field);
        self.notices
            .push(ConsoleNotice::SetpointRestored { axis, field, value });
        value
    }

    /// 连接探测（读取固件版本）
    pub fn probe(&mut self) -> Result<Option<String>, SessionError> {
        let axis = self.selected_axis();
        let Some(transport) = self.transport.clone() else {
            let err = SessionError::CommunicationsUnavailable;
            self.reject(axis, &err);
            return Err(err);
        };
        transport.drain();
        let reply = match transport.send(PROBE_COMMAND) {
            Ok(Some(reply)) => Some(reply),
            // 跳过串口回显与空行
            Ok(None) => (0..STATUS_REFRESH_ATTEMPTS)
                .filter_map(|_| transport.receive(self.reply_timeout))
                .find(|reply| {
                    let reply = reply.trim();
                    !reply.is_empty() && reply != PROBE_COMMAND
                }),
            Err(e) => {
                self.notices.push(ConsoleNotice::CommandFailed {
                    axis,
                    command: PROBE_COMMAND.to_string(),
                    error: e.to_string(),
                });
                return Err(e.into());
            },
        };
        self.notices.push(ConsoleNotice::ProbeReply(reply.clone()));
        Ok(reply)
    }

    /// 推送当前选中轴的快照
    pub fn report_status(&mut self) -> AxisSnapshot {
        let snapshot = self.snapshot(self.selected_axis());
        self.notices.push(ConsoleNotice::Status(snapshot.clone()));
        snapshot
    }

    /// 关闭传输（幂等）
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
            info!("Controller session closed");
        }
    }

    /// 编码并发送；结果同时记录为通知
    fn dispatch(&mut self, axis: AxisId, action: AxisAction) -> Result<Option<String>, SessionError> {
        let calibration = self.calibrations[axis.index()];
        let command = match self.encoder.encode(axis, &action, &calibration) {
            Ok(command) => command,
            Err(e) => {
                let err = SessionError::from(e);
                self.reject(axis, &err);
                return Err(err);
            },
        };

        let Some(transport) = self.transport.clone() else {
            let err = SessionError::CommunicationsUnavailable;
            warn!("Axis {}: '{}' not sent: {}", axis, command, err);
            self.reject(axis, &err);
            return Err(err);
        };

        match transport.send(command.as_str()) {
            Ok(reply) => {
                debug!("Axis {}: sent '{}' reply {:?}", axis, command, reply);
                self.notices.push(ConsoleNotice::CommandSent {
                    axis,
                    command: command.into_string(),
                    reply: reply.clone(),
                });
                Ok(reply)
            },
            Err(e) => {
                warn!("Axis {}: '{}' failed: {}", axis, command, e);
                self.notices.push(ConsoleNotice::CommandFailed {
                    axis,
                    command: command.into_string(),
                    error: e.to_string(),
                });
                Err(e.into())
            },
        }
    }

    fn reject(&mut self, axis: AxisId, err: &SessionError) {
        self.notices.push(ConsoleNotice::Rejected {
            axis,
            reason: err.to_string(),
        });
    }

    /// 使能/断使能后立即查询一次状态
    ///
    /// 先清空队列（使能命令的应答、串口回显），然后在有限次数内
    /// 等待一个能判定使能状态的回复。
    fn refresh_status(&mut self, axis: AxisId) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        transport.drain();

        let query = TelemetryQuery::Status.command(axis);
        let mut enabled = match transport.send(query.as_str()) {
            Ok(reply) => reply.as_deref().and_then(enabled_from_reply),
            Err(e) => {
                debug!("Status refresh for {} failed: {}", axis, e);
                return;
            },
        };
        let mut attempts = 0;
        while enabled.is_none() && attempts < STATUS_REFRESH_ATTEMPTS {
            attempts += 1;
            enabled = transport
                .receive(self.reply_timeout)
                .as_deref()
                .and_then(enabled_from_reply);
        }

        let Some(enabled) = enabled else {
            debug!("No status reply for {} after {} attempts", axis, attempts);
            return;
        };
        let state = &mut self.states[axis.index()];
        if state.enabled != enabled {
            state.enabled = enabled;
            self.notices
                .push(ConsoleNotice::EnabledChanged { axis, enabled });
        }
    }
}

fn enabled_from_reply(reply: &str) -> Option<bool> {
    extract_numeric(Some(reply)).and_then(|v| ServoStatus::classify(v).enabled())
}

impl Drop for ControllerSession {
    fn drop(&mut self) {
        self.close();
    }
}
