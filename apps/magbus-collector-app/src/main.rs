//! 收集端：订阅站点主题，解码 data 并写入配置的 Sink。
//!
//! fail-fast 策略下的 schema 完整性故障使进程以非零状态退出。

use magbus_collector::{
    ArchiveFileSink, Collector, LogSink, MismatchPolicy, MqttCollectorSource, MqttSourceConfig,
    Sink, SinkFanout,
};
use magbus_config::{CollectorConfig, ConfigError, SinkKind};
use magbus_telemetry::{init_tracing, metrics};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = CollectorConfig::from_env()?;
    init_tracing();

    let policy: MismatchPolicy = config.mismatch_policy.parse().map_err(|_| {
        ConfigError::Invalid(
            "MAGBUS_MISMATCH_POLICY".to_string(),
            config.mismatch_policy.clone(),
        )
    })?;
    let fanout = SinkFanout::spawn(build_sinks(&config)?, config.sink_queue);
    info!(
        target: "magbus.collector",
        sinks = ?fanout.sink_names(),
        policy = ?policy,
        "sinks_started"
    );
    let mut collector = Collector::new(policy, fanout);

    let source = MqttCollectorSource::new(MqttSourceConfig {
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        client_id: config.mqtt.client_id.clone(),
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        station: config.collect_station.clone(),
        qos: config.mqtt.qos,
    });
    info!(target: "magbus.collector", filter = %source.filter(), "collector_started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "magbus.collector", "shutdown_requested");
        }
        let _ = shutdown_tx.send(true);
    });

    let result = source.run(&mut collector, shutdown_rx).await;
    // 先排空 Sink 队列，再决定退出状态
    collector.shutdown().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "magbus.collector",
        messages_received = snapshot.messages_received,
        records_dispatched = snapshot.records_dispatched,
        unknown_schema_drops = snapshot.unknown_schema_drops,
        schema_mismatches = snapshot.schema_mismatches,
        decode_failures = snapshot.decode_failures,
        sink_failures = snapshot.sink_failures,
        sink_queue_drops = snapshot.sink_queue_drops,
        "collector_stopped"
    );
    if let Err(err) = &result {
        error!(target: "magbus.collector", error = %err, "collector_aborted");
    }
    result?;
    Ok(())
}

fn build_sinks(config: &CollectorConfig) -> Result<Vec<Box<dyn Sink>>, ConfigError> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(config.sinks.len());
    for kind in &config.sinks {
        match kind {
            SinkKind::Log => sinks.push(Box::new(LogSink)),
            SinkKind::File => {
                let dir = config
                    .archive_dir
                    .as_ref()
                    .ok_or_else(|| ConfigError::Missing("MAGBUS_ARCHIVE_DIR".to_string()))?;
                sinks.push(Box::new(ArchiveFileSink::new(dir)));
            }
        }
    }
    Ok(sinks)
}
