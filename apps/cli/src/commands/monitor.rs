//! 遥测监控

use crate::display;
use crate::utils::connect;
use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::unbounded;
use servo_control::{ConsoleConfig, ConsoleNotice, console};
use servo_driver::PollingEngine;
use servo_protocol::AxisId;
use std::sync::atomic::{AtomicBool, Ordering};

/// 监控参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 监控的轴
    #[arg(short, long, default_value = "A")]
    pub axis: AxisId,

    /// 收到指定数量的遥测后退出（默认一直运行到 Ctrl+C）
    #[arg(short, long)]
    pub cycles: Option<u64>,
}

impl MonitorCommand {
    pub fn execute(&self, config: &ConsoleConfig, shutdown: &AtomicBool) -> Result<()> {
        let mut session = connect(config)?;
        session.select_axis(self.axis);
        session.take_notices();

        let (event_tx, event_rx) = unbounded::<console::Event>();
        let engine = PollingEngine::spawn(
            session.transport().cloned(),
            session.selection(),
            event_tx,
            config.polling.polling_config(),
        )
        .context("启动轮询线程失败")?;

        println!("📊 监控轴 {}（{} ms），按 Ctrl+C 停止\n", self.axis, config.polling.period_ms);

        let mut received = 0u64;
        let exit = console::run(
            &mut session,
            &event_rx,
            shutdown,
            console::DEFAULT_TICK,
            |notice| {
                if matches!(notice, ConsoleNotice::Telemetry { .. }) {
                    received += 1;
                    if self.cycles.is_some_and(|n| received >= n) {
                        shutdown.store(true, Ordering::Release);
                    }
                }
                if let Some(line) = display::render(&notice) {
                    println!("{}", line);
                }
            },
        );

        engine.shutdown().context("停止轮询线程失败")?;
        session.close();
        println!("✅ 监控已结束（{:?}，{} 条遥测）", exit, received);
        Ok(())
    }
}
