//! 发布器
//!
//! 每个传感器维护一份 [`Schema`] 与批量栈：
//! - N = 1：每条记录一条 data，schema/dict 每 M 条重发一次（M 默认 10）
//! - N > 1：攒满 N 条后以记录分隔符拼成一条 data，每块都重发 schema/dict
//!
//! schema 与 dict 总在其对应的 data 之前发出。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{Channel, DICT_PLACEHOLDER, Reading, SensorDescriptor, Topic};
use magbus_codec::{Schema, join_records};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::BusClient;
use crate::error::PublishError;

/// 未批量时 schema 的重发间隔（条）。
pub const SCHEMA_EVERY: usize = 10;

struct SensorState {
    schema: Schema,
    sensor: Arc<SensorDescriptor>,
    extras: Vec<(String, String)>,
    stack: Vec<String>,
    sent: usize,
}

impl SensorState {
    fn new(reading: &Reading) -> Result<Self, PublishError> {
        Ok(Self {
            schema: Schema::new((*reading.header).clone())?,
            sensor: reading.sensor.clone(),
            extras: Vec::new(),
            stack: Vec::new(),
            sent: 0,
        })
    }
}

/// 字典载荷：缺失值为 `-`，值中的逗号替换为 `_`。
pub fn dict_payload(
    station: &str,
    sensor: &SensorDescriptor,
    extras: &[(String, String)],
) -> String {
    let clean = |value: Option<&str>| -> String {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.replace(',', "_").replace(['\r', '\n'], " "),
            None => DICT_PLACEHOLDER.to_string(),
        }
    };
    let mut pairs = vec![
        ("SensorID", clean(Some(&sensor.sensor_id))),
        ("StationID", clean(Some(station))),
        ("DataPier", clean(sensor.pier_id.as_deref())),
        ("SensorModule", clean(Some(&sensor.protocol))),
        ("SensorGroup", clean(sensor.group.as_deref())),
        ("SensorDescription", clean(sensor.description.as_deref())),
        ("DataTimeProtocol", clean(sensor.ptime.as_deref())),
    ]
    .into_iter()
    .map(|(key, value)| format!("{key}:{value}"))
    .collect::<Vec<_>>();
    pairs.extend(
        extras
            .iter()
            .map(|(key, value)| format!("{key}:{}", clean(Some(value)))),
    );
    pairs.join(",")
}

pub struct Publisher {
    station: String,
    bus: Arc<dyn BusClient>,
    schema_every: usize,
    sensors: HashMap<String, SensorState>,
}

impl Publisher {
    pub fn new(station: impl Into<String>, bus: Arc<dyn BusClient>) -> Self {
        Self {
            station: station.into(),
            bus,
            schema_every: SCHEMA_EVERY,
            sensors: HashMap::new(),
        }
    }

    pub fn with_schema_every(mut self, every: usize) -> Self {
        self.schema_every = every.max(1);
        self
    }

    /// 处理一条读数；栈满时发出。
    pub async fn publish(&mut self, reading: Reading) -> Result<(), PublishError> {
        let sensor_id = reading.sensor_id().to_string();
        let changed = self
            .sensors
            .get(&sensor_id)
            .is_none_or(|state| !state.schema.header().same_layout(&reading.header));
        if changed {
            // 头部变化前先发出旧布局的残留记录
            if let Err(err) = self.emit(&sensor_id).await {
                magbus_telemetry::record_publish_failure();
                warn!(
                    target: "magbus.publish",
                    sensor_id = %sensor_id,
                    error = %err,
                    "stack_flush_failed"
                );
            }
            let state = SensorState::new(&reading)?;
            info!(
                target: "magbus.publish",
                sensor_id = %sensor_id,
                type_code = %state.schema.header().type_code,
                batch = state.sensor.batch_factor(),
                "sensor_schema_bound"
            );
            self.sensors.insert(sensor_id.clone(), state);
        }

        let Some(state) = self.sensors.get_mut(&sensor_id) else {
            return Ok(());
        };
        let line = state.schema.encode_line(&reading.record)?;
        state.extras = reading.extras;
        state.stack.push(line);
        if state.stack.len() < state.sensor.batch_factor() {
            return Ok(());
        }
        self.emit(&sensor_id).await
    }

    async fn emit(&mut self, sensor_id: &str) -> Result<(), PublishError> {
        let Some(state) = self.sensors.get_mut(sensor_id) else {
            return Ok(());
        };
        if state.stack.is_empty() {
            return Ok(());
        }
        let every = if state.sensor.batch_factor() > 1 {
            1
        } else {
            self.schema_every
        };
        let records = state.stack.len();
        let payload = join_records(&state.stack);
        state.stack.clear();

        if state.sent % every == 0 {
            let schema_topic = Topic::new(&self.station, sensor_id, Channel::Schema);
            self.bus
                .publish(&schema_topic.to_string(), state.schema.header_line())
                .await?;
            let dict_topic = Topic::new(&self.station, sensor_id, Channel::Dict);
            self.bus
                .publish(
                    &dict_topic.to_string(),
                    dict_payload(&self.station, &state.sensor, &state.extras),
                )
                .await?;
            debug!(target: "magbus.publish", sensor_id, "schema_announced");
        }
        state.sent += 1;

        let data_topic = Topic::new(&self.station, sensor_id, Channel::Data);
        self.bus.publish(&data_topic.to_string(), payload).await?;
        magbus_telemetry::record_published(records as u64);
        Ok(())
    }

    /// 发出所有未满的栈。
    pub async fn flush(&mut self) -> Result<(), PublishError> {
        let pending: Vec<String> = self
            .sensors
            .iter()
            .filter(|(_, state)| !state.stack.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        let mut first_error = None;
        for sensor_id in pending {
            if let Err(err) = self.emit(&sensor_id).await {
                magbus_telemetry::record_publish_failure();
                warn!(
                    target: "magbus.publish",
                    sensor_id = %sensor_id,
                    error = %err,
                    "stack_flush_failed"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 消费读数通道直到关闭，然后发出残留栈。
    pub async fn run(mut self, mut readings: mpsc::Receiver<Reading>) {
        while let Some(reading) = readings.recv().await {
            let sensor_id = reading.sensor_id().to_string();
            if let Err(err) = self.publish(reading).await {
                magbus_telemetry::record_publish_failure();
                warn!(
                    target: "magbus.publish",
                    sensor_id = %sensor_id,
                    error = %err,
                    "publish_failed"
                );
            }
        }
        // flush 内部已记录失败
        let _ = self.flush().await;
        info!(target: "magbus.publish", "publisher_stopped");
    }
}
