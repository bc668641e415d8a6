//! 传感器任务与监督
//!
//! 每个传感器一个任务：
//! - 事件驱动：消费传输字节通道
//! - 轮询：按间隔 tick，每次 tick 一次限时交换
//!
//! 驱动请求重启时整体重建；传输丢失时保留驱动状态，退避后重开传输。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{Reading, SensorDescriptor};
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::driver::{EventDrivenDriver, NullTransport, PolledDriver, RequestTransport};
use crate::error::DriverError;
use crate::factory::{DriverContext, DriverFactory, DriverHandle};
use crate::transport::{open_byte_stream, open_request_transport};

/// 读数通道容量（驱动 → 发布）。
pub const READING_CHANNEL_CAPACITY: usize = 1024;

/// 一次会话的结束原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// 收到停机信号或下游已关闭
    Shutdown,
    /// 驱动请求整体重启
    Restart(String),
    /// 传输打开失败或被对端关闭
    TransportLost(String),
}

/// 等待停机信号；发送端被丢弃也视为停机。
pub async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn forward(out: &mpsc::Sender<Reading>, readings: Vec<Reading>) -> bool {
    for reading in readings {
        if out.send(reading).await.is_err() {
            return false;
        }
    }
    true
}

/// 运行事件驱动驱动，直到字节通道关闭、重启请求或停机。
pub async fn run_event_driven(
    driver: &mut dyn EventDrivenDriver,
    mut bytes: mpsc::Receiver<Vec<u8>>,
    out: &mpsc::Sender<Reading>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        let chunk = tokio::select! {
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
            chunk = bytes.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            return SessionEnd::TransportLost("byte stream closed".to_string());
        };
        let received_at = Utc::now().naive_utc();
        match driver.on_bytes(&chunk, received_at) {
            Ok(readings) => {
                if !forward(out, readings).await {
                    return SessionEnd::Shutdown;
                }
            }
            Err(DriverError::RestartRequested(reason)) => return SessionEnd::Restart(reason),
            Err(err) => {
                warn!(
                    target: "magbus.driver",
                    sensor_id = %driver.sensor().sensor_id,
                    error = %err,
                    "chunk_dropped"
                );
            }
        }
    }
}

/// 运行轮询驱动。超时或传输错误只跳过当前 tick。
pub async fn run_polled(
    driver: &mut dyn PolledDriver,
    transport: &mut dyn RequestTransport,
    period: Duration,
    poll_timeout: Duration,
    out: &mpsc::Sender<Reading>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
            _ = ticker.tick() => {}
        }
        let now = Utc::now().naive_utc();
        let sensor_id = driver.sensor().sensor_id.clone();
        let outcome = tokio::select! {
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
            outcome = timeout(poll_timeout, driver.poll(transport, now)) => outcome,
        };
        match outcome {
            Ok(Ok(readings)) => {
                if !forward(out, readings).await {
                    return SessionEnd::Shutdown;
                }
            }
            Ok(Err(DriverError::RestartRequested(reason))) => return SessionEnd::Restart(reason),
            Ok(Err(err)) => {
                warn!(
                    target: "magbus.driver",
                    sensor_id = %sensor_id,
                    error = %err,
                    "poll_skipped"
                );
            }
            Err(_) => {
                warn!(
                    target: "magbus.driver",
                    sensor_id = %sensor_id,
                    timeout_ms = poll_timeout.as_millis() as u64,
                    "poll_timeout"
                );
                // 丢弃未读完的应答
                if let Err(err) = transport.reset().await {
                    warn!(
                        target: "magbus.driver",
                        sensor_id = %sensor_id,
                        error = %err,
                        "transport_reset_failed"
                    );
                }
            }
        }
    }
}

async fn run_session(
    handle: &mut DriverHandle,
    ctx: &DriverContext,
    out: &mpsc::Sender<Reading>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    match handle {
        DriverHandle::EventDriven(driver) => {
            let sensor = driver.sensor().clone();
            let bytes = match open_byte_stream(&sensor, &ctx.serial_prefix).await {
                Ok(bytes) => bytes,
                Err(err) => return SessionEnd::TransportLost(err.to_string()),
            };
            driver.reset();
            run_event_driven(driver.as_mut(), bytes, out, shutdown).await
        }
        DriverHandle::Polled(driver) => {
            let sensor = driver.sensor().clone();
            let mut transport: Box<dyn RequestTransport> = if driver.uses_transport() {
                match open_request_transport(&sensor, &ctx.serial_prefix).await {
                    Ok(transport) => transport,
                    Err(err) => return SessionEnd::TransportLost(err.to_string()),
                }
            } else {
                Box::new(NullTransport)
            };
            let period = Duration::from_secs(sensor.poll_rate_secs.max(1));
            run_polled(
                driver.as_mut(),
                transport.as_mut(),
                period,
                ctx.poll_timeout,
                out,
                shutdown,
            )
            .await
        }
    }
}

/// 监督单个传感器：构造驱动、运行会话，结束后按原因重建或重开传输。
pub async fn supervise_sensor(
    factory: Arc<DriverFactory>,
    sensor: SensorDescriptor,
    ctx: DriverContext,
    backoff: Duration,
    out: mpsc::Sender<Reading>,
    mut shutdown: watch::Receiver<bool>,
) {
    let sensor_id = sensor.sensor_id.clone();
    let mut current: Option<DriverHandle> = None;
    loop {
        let mut handle = match current.take() {
            Some(handle) => handle,
            None => match factory.build(sensor.clone(), &ctx) {
                Ok(handle) => handle,
                Err(err) => {
                    error!(
                        target: "magbus.acquisition",
                        sensor_id = %sensor_id,
                        error = %err,
                        "driver_build_failed"
                    );
                    return;
                }
            },
        };
        info!(
            target: "magbus.acquisition",
            sensor_id = %sensor_id,
            protocol = %sensor.protocol,
            kind = ?handle.kind(),
            "sensor_session_started"
        );

        match run_session(&mut handle, &ctx, &out, &mut shutdown).await {
            SessionEnd::Shutdown => {
                debug!(
                    target: "magbus.acquisition",
                    sensor_id = %sensor_id,
                    "sensor_session_stopped"
                );
                return;
            }
            SessionEnd::Restart(reason) => {
                magbus_telemetry::record_driver_restart();
                warn!(
                    target: "magbus.acquisition",
                    sensor_id = %sensor_id,
                    reason = %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "driver_restart"
                );
            }
            SessionEnd::TransportLost(reason) => {
                warn!(
                    target: "magbus.acquisition",
                    sensor_id = %sensor_id,
                    reason = %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "transport_lost"
                );
                current = Some(handle);
            }
        }

        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::test_source::TestSourceDriver;

    #[tokio::test]
    async fn polled_session_stops_on_shutdown() {
        let sensor = SensorDescriptor::new("TEST_1234_0001", "", "Test");
        let mut driver = TestSourceDriver::new(sensor).expect("test");
        let (out, mut rx) = mpsc::channel(8);
        let (stop, mut shutdown) = watch::channel(false);
        let session = tokio::spawn(async move {
            run_polled(
                &mut driver,
                &mut NullTransport,
                Duration::from_millis(10),
                Duration::from_secs(1),
                &out,
                &mut shutdown,
            )
            .await
        });
        let first = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reading in time")
            .expect("reading");
        assert_eq!(first.sensor_id(), "TEST_1234_0001");
        stop.send(true).expect("stop");
        assert_eq!(session.await.expect("join"), SessionEnd::Shutdown);
    }

    #[tokio::test]
    async fn closed_byte_stream_is_transport_loss() {
        let factory = DriverFactory::builtin();
        let mut handle = factory
            .build(
                SensorDescriptor::new("GSM90_1_0001", "S0", "GSM90"),
                &DriverContext::default(),
            )
            .expect("gsm90");
        let DriverHandle::EventDriven(driver) = &mut handle else {
            panic!("gsm90 is event driven");
        };
        let (tx, bytes) = mpsc::channel(4);
        let (out, _rx) = mpsc::channel(4);
        let (_stop, mut shutdown) = watch::channel(false);
        drop(tx);
        let end = run_event_driven(driver.as_mut(), bytes, &out, &mut shutdown).await;
        assert!(matches!(end, SessionEnd::TransportLost(_)));
    }
}
