pub mod data;
pub mod header;
pub mod keys;
pub mod sensor;
pub mod topic;

pub use data::{CanonicalRecord, FieldValue, TimeParts};
pub use header::{DICT_PLACEHOLDER, FieldSpec, HeaderDescriptor};
pub use keys::{CANONICAL_KEYS, KeyError, KeyKind, TIME_KEY, key_index, key_kind, validate_keys};
pub use sensor::{SensorDescriptor, SensorIdentity, SensorMode, TimeSource};
pub use topic::{Channel, Topic, station_filter};

/// 读数：驱动输出的一条规范记录，连同其所属传感器与头部。
#[derive(Debug, Clone)]
pub struct Reading {
    pub sensor: std::sync::Arc<SensorDescriptor>,
    pub header: std::sync::Arc<HeaderDescriptor>,
    pub record: CanonicalRecord,
    /// 驱动附加的字典条目（如 DataNTPTimeDelay）
    pub extras: Vec<(String, String)>,
}

impl Reading {
    pub fn sensor_id(&self) -> &str {
        &self.sensor.sensor_id
    }
}
