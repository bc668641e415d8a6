//! 采集端：按传感器清单启动驱动，把读数发布到总线。
//!
//! 每个顶层传感器一个监督任务；板卡上的子传感器由板卡驱动发现并登记。
//! 配置了 `MAGBUS_BUFFER_DIR` 时，读数在发布前先写入本地归档。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use domain::Reading;
use magbus_collector::{ArchiveFileSink, Sink};
use magbus_config::{AcquisitionConfig, load_sensors};
use magbus_protocol::{
    DriverContext, DriverFactory, READING_CHANNEL_CAPACITY, SensorCatalog, supervise_sensor,
};
use magbus_publish::{MqttBus, MqttBusConfig, Publisher};
use magbus_telemetry::{init_tracing, metrics};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// 停机后留给事件循环发出残留消息的时间。
const FLUSH_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AcquisitionConfig::from_env()?;
    init_tracing();

    let sensors = load_sensors(&config.sensors_file)?;
    let catalog = SensorCatalog::new(sensors.clone()).with_persistence(&config.sensors_file);
    let ctx = DriverContext {
        catalog,
        serial_prefix: config.serial_prefix.clone(),
        poll_timeout: config.poll_timeout,
        database_url: config.mysql_url.clone(),
    };
    let factory = Arc::new(DriverFactory::builtin());

    // 子传感器（带 path）不单独占用端口
    let boards: Vec<_> = sensors.into_iter().filter(|s| s.path.is_none()).collect();
    // 未知协议与模式不符在启动期失败
    for sensor in &boards {
        factory.build(sensor.clone(), &ctx)?;
    }
    if boards.is_empty() {
        warn!(
            target: "magbus.acquisition",
            file = %config.sensors_file.display(),
            "no_sensors_configured"
        );
    }

    let (bus, eventloop) = MqttBus::connect(MqttBusConfig {
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        client_id: config.mqtt.client_id.clone(),
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        qos: config.mqtt.qos,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (out, readings) = mpsc::channel(READING_CHANNEL_CAPACITY);
    let readings = match &config.buffer_dir {
        Some(dir) => buffer_locally(dir, readings),
        None => readings,
    };
    let publisher =
        tokio::spawn(Publisher::new(config.station.clone(), Arc::new(bus)).run(readings));

    let mut tasks = Vec::with_capacity(boards.len());
    for sensor in boards {
        tasks.push(tokio::spawn(supervise_sensor(
            factory.clone(),
            sensor,
            ctx.clone(),
            config.restart_backoff,
            out.clone(),
            shutdown_rx.clone(),
        )));
    }
    // 所有驱动结束后读数通道随之关闭
    drop(out);
    info!(
        target: "magbus.acquisition",
        station = %config.station,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        sensors = tasks.len(),
        "acquisition_started"
    );

    tokio::signal::ctrl_c().await?;
    info!(target: "magbus.acquisition", "shutdown_requested");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    let _ = publisher.await;
    tokio::time::sleep(FLUSH_GRACE).await;
    eventloop.abort();

    let snapshot = metrics().snapshot();
    info!(
        target: "magbus.acquisition",
        frames_decoded = snapshot.frames_decoded,
        corruption_discards = snapshot.corruption_discards,
        driver_restarts = snapshot.driver_restarts,
        records_published = snapshot.records_published,
        publish_failures = snapshot.publish_failures,
        "acquisition_stopped"
    );
    Ok(())
}

/// 把读数写入本地归档后再转交发布器。
fn buffer_locally(dir: &Path, mut readings: mpsc::Receiver<Reading>) -> mpsc::Receiver<Reading> {
    let (tx, rx) = mpsc::channel(READING_CHANNEL_CAPACITY);
    let mut archive = ArchiveFileSink::new(dir);
    tokio::spawn(async move {
        while let Some(reading) = readings.recv().await {
            if let Err(err) = archive
                .write(reading.sensor_id(), &reading.record, &reading.header)
                .await
            {
                warn!(
                    target: "magbus.acquisition",
                    sensor_id = %reading.sensor_id(),
                    error = %err,
                    "local_buffer_write_failed"
                );
            }
            if tx.send(reading).await.is_err() {
                break;
            }
        }
    });
    info!(target: "magbus.acquisition", dir = %dir.display(), "local_buffer_enabled");
    rx
}
