//! 传感器会话注册表：`UNKNOWN → SCHEMA_KNOWN → ACTIVE`，另有 `FAULTED`。

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use domain::HeaderDescriptor;
use magbus_codec::Schema;

use crate::error::CollectorError;

/// 单个传感器的会话状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    SchemaKnown,
    Active,
    /// schema 完整性故障，等待匹配的 schema
    Faulted,
}

/// SchemaMismatch 的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// 只隔离该传感器
    #[default]
    Isolate,
    /// 返回完整性错误，由进程退出
    FailFast,
}

impl FromStr for MismatchPolicy {
    type Err = CollectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(MismatchPolicy::Isolate),
            "fail-fast" | "failfast" => Ok(MismatchPolicy::FailFast),
            other => Err(CollectorError::Setting(format!("mismatch policy {other}"))),
        }
    }
}

/// 一个传感器的会话。
#[derive(Debug, Clone)]
pub struct SensorSession {
    pub state: SessionState,
    schema: Option<Schema>,
    header: Option<Arc<HeaderDescriptor>>,
}

impl SensorSession {
    fn unknown() -> Self {
        Self {
            state: SessionState::Unknown,
            schema: None,
            header: None,
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// 当前头部（含字典属性）的共享快照。
    pub fn header(&self) -> Option<Arc<HeaderDescriptor>> {
        self.header.clone()
    }

    /// 绑定 schema；同布局保留状态，新布局替换头部但保留属性。
    pub(crate) fn bind(&mut self, schema: Schema) {
        match self.schema.as_mut() {
            Some(current) if current.header().same_layout(schema.header()) => {}
            Some(current) => {
                let attributes = std::mem::take(&mut current.header_mut().attributes);
                let mut schema = schema;
                schema.header_mut().attributes = attributes;
                *current = schema;
            }
            None => self.schema = Some(schema),
        }
        if matches!(self.state, SessionState::Unknown | SessionState::Faulted) {
            self.state = SessionState::SchemaKnown;
        }
        self.refresh();
    }

    /// 合并 `key:value` 字典；返回改动的条数。
    pub(crate) fn merge_dict(&mut self, payload: &str) -> usize {
        let Some(schema) = self.schema.as_mut() else {
            return 0;
        };
        let mut changed = 0;
        for pair in payload.split(',') {
            if let Some((key, value)) = pair.split_once(':') {
                if schema.header_mut().merge_attribute(key.trim(), value.trim()) {
                    changed += 1;
                }
            }
        }
        self.state = SessionState::Active;
        self.refresh();
        changed
    }

    pub(crate) fn fault(&mut self) {
        self.state = SessionState::Faulted;
    }

    fn refresh(&mut self) {
        self.header = self.schema.as_ref().map(|s| Arc::new(s.header().clone()));
    }
}

/// 每个收集器独有的会话表。
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, SensorSession>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, sensor_id: &str) -> SessionState {
        self.sessions
            .get(sensor_id)
            .map_or(SessionState::Unknown, |s| s.state)
    }

    pub fn session(&self, sensor_id: &str) -> Option<&SensorSession> {
        self.sessions.get(sensor_id)
    }

    pub(crate) fn session_mut(&mut self, sensor_id: &str) -> &mut SensorSession {
        self.sessions
            .entry(sensor_id.to_string())
            .or_insert_with(SensorSession::unknown)
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "# MagPyBin ENV05_2_0001 [t1,t2] [T,DewPoint] [degC,degC] [1000,1000] 6hLll 24";

    #[test]
    fn dict_placeholder_keeps_existing_value() {
        let mut registry = Registry::new();
        let session = registry.session_mut("ENV05_2_0001");
        session.bind(Schema::parse(HEADER, Some("ENV05_2_0001")).expect("schema"));
        assert_eq!(session.state, SessionState::SchemaKnown);
        session.merge_dict("t1:18.0");
        session.merge_dict("t1:-,t2:21.3");
        let header = session.header().expect("header");
        assert_eq!(header.attributes.get("t1").map(String::as_str), Some("18.0"));
        assert_eq!(header.attributes.get("t2").map(String::as_str), Some("21.3"));
        assert_eq!(registry.state("ENV05_2_0001"), SessionState::Active);
    }

    #[test]
    fn changed_schema_keeps_attributes() {
        let mut registry = Registry::new();
        let session = registry.session_mut("ENV05_2_0001");
        session.bind(Schema::parse(HEADER, None).expect("schema"));
        session.merge_dict("SensorGroup:roof");
        let wider =
            "# MagPyBin ENV05_2_0001 [t1,t2,var1] [T,DewPoint,RH] [degC,degC,per] [1000,1000,1000] 6hLlll 28";
        session.bind(Schema::parse(wider, None).expect("schema"));
        let header = session.header().expect("header");
        assert_eq!(header.keys.len(), 3);
        assert_eq!(header.attributes.get("SensorGroup").map(String::as_str), Some("roof"));
        assert_eq!(session.state, SessionState::Active);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("fail-fast".parse::<MismatchPolicy>().ok(), Some(MismatchPolicy::FailFast));
        assert_eq!("Isolate".parse::<MismatchPolicy>().ok(), Some(MismatchPolicy::Isolate));
        assert!("panic".parse::<MismatchPolicy>().is_err());
    }
}
