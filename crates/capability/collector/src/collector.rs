//! 按传感器的 schema 状态机。
//!
//! - schema：解析并校验内嵌 sensorId，缓存头部
//! - dict：合并属性（`-` 保留原值），进入 ACTIVE
//! - data：无 schema 时丢弃；否则逐条解码并分发到所有 Sink

use domain::{Channel, Topic};
use magbus_codec::{CodecError, Schema, split_records};
use tracing::{debug, error, info, warn};

use crate::error::CollectorError;
use crate::registry::{MismatchPolicy, Registry, SessionState};
use crate::sink::{Dispatch, SinkFanout};

/// 单条总线消息的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    SchemaBound,
    DictMerged { changed: usize },
    Dispatched { records: usize, failed: usize },
    /// 无 schema 的 data
    UnknownSchema,
    /// 会话处于 FAULTED 或消息无法解析
    Dropped,
    /// schema 与主题不符，会话已隔离
    Faulted,
}

pub struct Collector {
    registry: Registry,
    policy: MismatchPolicy,
    fanout: SinkFanout,
}

impl Collector {
    pub fn new(policy: MismatchPolicy, fanout: SinkFanout) -> Self {
        Self {
            registry: Registry::new(),
            policy,
            fanout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 处理一条总线消息。
    ///
    /// 主题非法返回 `Topic`；fail-fast 策略下 schema 完整性故障返回 `Integrity`。
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Handled, CollectorError> {
        magbus_telemetry::record_message_received();
        let topic = Topic::parse(topic).ok_or_else(|| CollectorError::Topic(topic.to_string()))?;
        let payload = String::from_utf8_lossy(payload);
        match topic.channel {
            Channel::Schema => self.on_schema(&topic.sensor_id, &payload),
            Channel::Dict => Ok(self.on_dict(&topic.sensor_id, &payload)),
            Channel::Data => Ok(self.on_data(&topic.sensor_id, &payload)),
        }
    }

    fn on_schema(&mut self, sensor_id: &str, payload: &str) -> Result<Handled, CollectorError> {
        match Schema::parse(payload.trim(), Some(sensor_id)) {
            Ok(schema) => {
                let session = self.registry.session_mut(sensor_id);
                let previous = session.state;
                session.bind(schema);
                if previous != session.state {
                    info!(
                        target: "magbus.collector",
                        sensor_id,
                        from = ?previous,
                        to = ?session.state,
                        "session_state_changed"
                    );
                }
                Ok(Handled::SchemaBound)
            }
            Err(CodecError::SchemaMismatch { expected, found }) => {
                magbus_telemetry::record_schema_mismatch();
                error!(
                    target: "magbus.collector",
                    sensor_id,
                    expected = %expected,
                    found = %found,
                    policy = ?self.policy,
                    "schema_integrity_violation"
                );
                match self.policy {
                    MismatchPolicy::Isolate => {
                        self.registry.session_mut(sensor_id).fault();
                        Ok(Handled::Faulted)
                    }
                    MismatchPolicy::FailFast => Err(CollectorError::Integrity {
                        sensor_id: sensor_id.to_string(),
                        reason: format!("schema names {found}"),
                    }),
                }
            }
            Err(err) => {
                warn!(target: "magbus.collector", sensor_id, error = %err, "schema_rejected");
                Ok(Handled::Dropped)
            }
        }
    }

    fn on_dict(&mut self, sensor_id: &str, payload: &str) -> Handled {
        match self.registry.state(sensor_id) {
            SessionState::SchemaKnown | SessionState::Active => {
                let changed = self.registry.session_mut(sensor_id).merge_dict(payload);
                debug!(target: "magbus.collector", sensor_id, changed, "dict_merged");
                Handled::DictMerged { changed }
            }
            state => {
                debug!(target: "magbus.collector", sensor_id, state = ?state, "dict_ignored");
                Handled::Dropped
            }
        }
    }

    fn on_data(&mut self, sensor_id: &str, payload: &str) -> Handled {
        let state = self.registry.state(sensor_id);
        let header = match state {
            SessionState::Unknown => {
                magbus_telemetry::record_unknown_schema_drop();
                info!(
                    target: "magbus.collector",
                    sensor_id,
                    raw = %payload,
                    "data_without_schema"
                );
                return Handled::UnknownSchema;
            }
            SessionState::Faulted => {
                debug!(target: "magbus.collector", sensor_id, "faulted_data_dropped");
                return Handled::Dropped;
            }
            SessionState::SchemaKnown | SessionState::Active => {
                match self.registry.session(sensor_id).and_then(|s| s.header()) {
                    Some(header) => header,
                    None => return Handled::Dropped,
                }
            }
        };
        let Some(schema) = self.registry.session(sensor_id).and_then(|s| s.schema()) else {
            return Handled::Dropped;
        };

        let mut records = 0;
        let mut failed = 0;
        for line in split_records(payload) {
            match schema.decode_line(line) {
                Ok(record) => {
                    self.fanout.dispatch(Dispatch {
                        sensor_id: sensor_id.to_string(),
                        record,
                        header: header.clone(),
                    });
                    records += 1;
                }
                Err(err) => {
                    failed += 1;
                    magbus_telemetry::record_decode_failure();
                    warn!(
                        target: "magbus.collector",
                        sensor_id,
                        error = %err,
                        record = line,
                        "record_decode_failed"
                    );
                }
            }
        }
        Handled::Dispatched { records, failed }
    }

    /// 关闭所有 Sink 队列并等待写完。
    pub async fn shutdown(self) {
        self.fanout.shutdown().await;
    }
}
