//! 遥测轮询线程
//!
//! 每个周期只轮询当前选中的轴：
//! 1. 清空队列中的过期回复
//! 2. 依次查询位置、力矩、使能状态、实际速度；没有内联回复时在
//!    有限次数内从回复队列重试
//! 3. 解析得到的字段缺失不视为错误
//! 4. 发送一个 [`TelemetryEvent`]
//! 5. 再次清空过期回复，休眠到下一周期
//!
//! 停止是协作式的：每次接收都有超时，停止标志在每次接收前与休眠期间检查。

use crate::{AxisSelection, ConsoleEvent, DriverError, TelemetryEvent};
use crossbeam_channel::Sender;
use servo_protocol::{AxisId, TelemetryQuery, extract_numeric};
use servo_transport::{JoinTimeout, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 休眠切片，决定停止请求的响应粒度
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// 轮询配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// 轮询周期
    pub period: Duration,
    /// 单次接收超时
    pub reply_timeout: Duration,
    /// 位置查询的接收重试次数
    pub position_attempts: u32,
    /// 力矩/状态/速度查询的接收重试次数
    pub telemetry_attempts: u32,
    /// 停止时等待线程退出的宽限期
    pub join_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(200),
            reply_timeout: Duration::from_millis(200),
            position_attempts: 5,
            telemetry_attempts: 3,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl PollingConfig {
    fn attempts(&self, query: TelemetryQuery) -> u32 {
        match query {
            TelemetryQuery::Position => self.position_attempts,
            _ => self.telemetry_attempts,
        }
    }
}

/// 执行一个轮询周期
///
/// 没有传输（降级模式）时返回全部字段缺失的事件。
pub fn poll_cycle(
    transport: Option<&Transport>,
    axis: AxisId,
    config: &PollingConfig,
    is_running: &AtomicBool,
) -> TelemetryEvent {
    let mut event = TelemetryEvent::absent(axis);
    let Some(transport) = transport else {
        return event;
    };

    let stale = transport.drain();
    if stale > 0 {
        trace!("Discarded {} stale replies before polling {}", stale, axis);
    }

    for query in TelemetryQuery::CYCLE {
        if !is_running.load(Ordering::Acquire) {
            break;
        }
        let (value, raw) = query_value(transport, query, axis, config, is_running);
        match query {
            TelemetryQuery::Position => {
                event.position_deg = value;
                event.raw_position_reply = raw;
            },
            TelemetryQuery::Torque => event.torque = value,
            TelemetryQuery::Status => event.status = value,
            TelemetryQuery::Speed => event.speed = value,
        }
    }

    transport.drain();
    event
}

/// 发送一条查询并在预算内取得数值
///
/// 返回（数值，最后一次看到的原始回复）。
fn query_value(
    transport: &Transport,
    query: TelemetryQuery,
    axis: AxisId,
    config: &PollingConfig,
    is_running: &AtomicBool,
) -> (Option<f64>, Option<String>) {
    let command = query.command(axis);
    let mut raw = None;

    match transport.send(command.as_str()) {
        Ok(Some(reply)) => {
            let reply = reply.trim().to_string();
            if let Some(value) = extract_numeric(Some(reply.as_str())) {
                return (Some(value), Some(reply));
            }
            raw = Some(reply);
        },
        Ok(None) => {},
        Err(e) => {
            debug!("Telemetry query '{}' failed: {}", command, e);
            return (None, None);
        },
    }

    for _ in 0..config.attempts(query) {
        if !is_running.load(Ordering::Acquire) {
            break;
        }
        if let Some(reply) = transport.receive(config.reply_timeout) {
            let reply = reply.trim().to_string();
            if let Some(value) = extract_numeric(Some(reply.as_str())) {
                return (Some(value), Some(reply));
            }
            raw = Some(reply);
        }
    }

    (None, raw)
}

/// 可中断休眠
fn sleep_while_running(duration: Duration, is_running: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while is_running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        spin_sleep::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// 轮询引擎（拥有轮询线程）
pub struct PollingEngine {
    is_running: Arc<AtomicBool>,
    selection: Arc<AxisSelection>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl PollingEngine {
    /// 启动轮询线程
    ///
    /// `transport` 为 `None` 时进入降级模式：线程照常运行，只发送缺失事件。
    pub fn spawn<Op>(
        transport: Option<Arc<Transport>>,
        selection: Arc<AxisSelection>,
        events: Sender<ConsoleEvent<Op>>,
        config: PollingConfig,
    ) -> Result<Self, DriverError>
    where
        Op: Send + 'static,
    {
        if transport.is_none() {
            warn!("Polling without a transport: telemetry will be unavailable");
        }

        let is_running = Arc::new(AtomicBool::new(true));
        let join_timeout = config.join_timeout;

        let thread_running = is_running.clone();
        let thread_selection = selection.clone();
        let handle = std::thread::Builder::new()
            .name("servo-poller".into())
            .spawn(move || {
                poll_loop(
                    transport.as_deref(),
                    &thread_selection,
                    &events,
                    &config,
                    &thread_running,
                )
            })?;

        Ok(Self {
            is_running,
            selection,
            handle: Some(handle),
            join_timeout,
        })
    }

    pub fn selection(&self) -> &Arc<AxisSelection> {
        &self.selection
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 停止轮询并等待线程退出
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join_timeout(self.join_timeout).is_err() {
                error!(
                    "Polling thread panicked or failed to shut down within {:?}",
                    self.join_timeout
                );
                return Err(DriverError::JoinTimeout(self.join_timeout));
            }
            debug!("Polling thread stopped");
        }
        Ok(())
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn poll_loop<Op>(
    transport: Option<&Transport>,
    selection: &AxisSelection,
    events: &Sender<ConsoleEvent<Op>>,
    config: &PollingConfig,
    is_running: &AtomicBool,
) {
    debug!("Polling thread started (period {:?})", config.period);
    while is_running.load(Ordering::Acquire) {
        let axis = selection.get();
        let event = poll_cycle(transport, axis, config, is_running);
        if !is_running.load(Ordering::Acquire) {
            break;
        }
        trace!("Telemetry for {}: {:?}", axis, event);
        if events.send(ConsoleEvent::Telemetry(event)).is_err() {
            debug!("Event channel closed, polling thread exiting");
            break;
        }
        sleep_while_running(config.period, is_running);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_transport::ScriptedLink;

    fn fast_config() -> PollingConfig {
        PollingConfig {
            period: Duration::from_millis(5),
            reply_timeout: Duration::from_millis(5),
            ..PollingConfig::default()
        }
    }

    fn scripted(axis: char) -> (ScriptedLink, Transport) {
        let link = ScriptedLink::new();
        link.reply_always(&format!("MG _RP{axis}"), "MG _RP\r\n 90.5000");
        link.reply_always(&format!("MG _TC{axis}"), "-1.2500");
        link.reply_always(&format!("MG _MO{axis}"), "0.0000");
        link.reply_always(&format!("MG _SPE{axis}"), "12.0000");
        let transport = Transport::from_link(Box::new(link.clone()));
        (link, transport)
    }

    #[test]
    fn test_poll_cycle_collects_all_fields() {
        let (link, transport) = scripted('B');
        let running = AtomicBool::new(true);
        let event = poll_cycle(Some(&transport), AxisId::B, &fast_config(), &running);

        assert_eq!(event.axis, AxisId::B);
        assert_eq!(event.position_deg, Some(90.5));
        assert_eq!(event.raw_position_reply.as_deref(), Some("MG _RP\r\n 90.5000"));
        assert_eq!(event.torque, Some(-1.25));
        assert_eq!(event.status, Some(0.0));
        assert_eq!(event.speed, Some(12.0));
        assert_eq!(
            link.sent(),
            vec!["MG _RPB", "MG _TCB", "MG _MOB", "MG _SPEB"]
        );
    }

    #[test]
    fn test_poll_cycle_reports_absent_fields() {
        let link = ScriptedLink::new();
        link.reply_always("MG _RPA", ":");
        link.reply_always("MG _MOA", "1.0000");
        let transport = Transport::from_link(Box::new(link));
        let running = AtomicBool::new(true);
        let event = poll_cycle(Some(&transport), AxisId::A, &fast_config(), &running);

        assert_eq!(event.position_deg, None);
        assert_eq!(event.raw_position_reply.as_deref(), Some(":"));
        assert_eq!(event.torque, None);
        assert_eq!(event.status, Some(1.0));
        assert_eq!(event.speed, None);
    }

    #[test]
    fn test_poll_cycle_without_transport() {
        let running = AtomicBool::new(true);
        let event = poll_cycle(None, AxisId::D, &fast_config(), &running);
        assert_eq!(event, TelemetryEvent::absent(AxisId::D));
    }

    #[test]
    fn test_failed_link_yields_absent_fields() {
        let (link, transport) = scripted('A');
        link.set_failing(true);
        let running = AtomicBool::new(true);
        let event = poll_cycle(Some(&transport), AxisId::A, &fast_config(), &running);
        assert!(event.is_empty());
    }

    #[test]
    fn test_engine_follows_selection_and_stops() {
        let (link, transport) = scripted('C');
        link.reply_always("MG _RPA", "1.0000");
        let transport = Arc::new(transport);
        let selection = Arc::new(AxisSelection::new(AxisId::A));
        let (tx, rx) = crossbeam_channel::unbounded::<ConsoleEvent<()>>();

        let engine =
            PollingEngine::spawn(Some(transport), selection.clone(), tx, fast_config()).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        match first {
            ConsoleEvent::Telemetry(event) => assert_eq!(event.axis, AxisId::A),
            other => panic!("unexpected event: {other:?}"),
        }

        selection.set(AxisId::C);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_c = false;
        while Instant::now() < deadline {
            if let Ok(ConsoleEvent::Telemetry(event)) = rx.recv_timeout(Duration::from_millis(100))
                && event.axis == AxisId::C
            {
                assert_eq!(event.position_deg, Some(90.5));
                saw_c = true;
                break;
            }
        }
        assert!(saw_c);
        assert!(engine.is_running());

        let start = Instant::now();
        engine.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_engine_exits_when_channel_closed() {
        let selection = Arc::new(AxisSelection::default());
        let (tx, rx) = crossbeam_channel::unbounded::<ConsoleEvent<()>>();
        drop(rx);
        let engine = PollingEngine::spawn(None, selection, tx, fast_config()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!engine.is_running());
        engine.shutdown().unwrap();
    }
}
