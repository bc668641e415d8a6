//! 传感器描述（SensorDescriptor）。
//!
//! 来自外部配置（JSON 传感器清单）；发现的子传感器在运行时追加。

use serde::{Deserialize, Serialize};

/// 传感器工作模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// 被动：设备主动推送数据
    #[default]
    Passive,
    /// 主动：需要轮询请求
    Active,
}

/// 主时间来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// 仪器内部时钟（GPS 等）
    Instrument,
    /// 主机时钟（NTP）
    Host,
}

impl TimeSource {
    /// 字典中 DataTimeProtocol 的取值。
    pub fn label(&self) -> &'static str {
        match self {
            TimeSource::Instrument => "GPS",
            TimeSource::Host => "NTP",
        }
    }
}

/// 传感器描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// name_serial_revision
    #[serde(rename = "sensorid")]
    pub sensor_id: String,
    /// 设备后缀、tcp://host:port，或子传感器所在的板卡 ID
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default)]
    pub mode: SensorMode,
    /// 打开端口后写入的初始化序列
    #[serde(default)]
    pub init: Option<String>,
    /// 轮询间隔（秒）
    #[serde(default = "default_rate", rename = "rate")]
    pub poll_rate_secs: u64,
    /// 批量因子 N
    #[serde(default = "default_stack")]
    pub stack: usize,
    pub protocol: String,
    #[serde(default, rename = "pierid")]
    pub pier_id: Option<String>,
    #[serde(default, rename = "sensorgroup")]
    pub group: Option<String>,
    #[serde(default, rename = "sensordesc")]
    pub description: Option<String>,
    /// 主时间来源：GPS / NTP
    #[serde(default)]
    pub ptime: Option<String>,
    /// 子传感器在板卡上的编号
    #[serde(default)]
    pub path: Option<String>,
}

fn default_baudrate() -> u32 {
    9600
}

fn default_bytesize() -> u8 {
    8
}

fn default_stopbits() -> u8 {
    1
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_rate() -> u64 {
    30
}

fn default_stack() -> usize {
    1
}

/// 由 sensorid 拆出的身份三元组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    pub name: String,
    pub serial: String,
    pub revision: String,
}

impl SensorIdentity {
    /// 组合成 name_serial_revision。
    pub fn sensor_id(&self) -> String {
        format!("{}_{}_{}", self.name, self.serial, self.revision)
    }
}

impl SensorDescriptor {
    /// 以默认串口参数构造描述（用于发现的子传感器和测试）。
    pub fn new(
        sensor_id: impl Into<String>,
        port: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            port: port.into(),
            baudrate: default_baudrate(),
            bytesize: default_bytesize(),
            stopbits: default_stopbits(),
            parity: default_parity(),
            mode: SensorMode::default(),
            init: None,
            poll_rate_secs: default_rate(),
            stack: default_stack(),
            protocol: protocol.into(),
            pier_id: None,
            group: None,
            description: None,
            ptime: None,
            path: None,
        }
    }

    /// 有效批量因子（至少为 1）。
    pub fn batch_factor(&self) -> usize {
        self.stack.max(1)
    }

    pub fn time_source(&self) -> TimeSource {
        match self.ptime.as_deref() {
            Some(value) if value.eq_ignore_ascii_case("ntp") => TimeSource::Host,
            _ => TimeSource::Instrument,
        }
    }

    /// 拆分 name_serial_revision；name 本身可以包含下划线。
    pub fn identity(&self) -> Option<SensorIdentity> {
        let mut parts = self.sensor_id.rsplitn(3, '_');
        let revision = parts.next()?;
        let serial = parts.next()?;
        let name = parts.next()?;
        if name.is_empty() || serial.is_empty() || revision.is_empty() {
            return None;
        }
        Some(SensorIdentity {
            name: name.to_string(),
            serial: serial.to_string(),
            revision: revision.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_from_json() {
        let json = r#"{"sensorid":"LEMI036_1_0002","port":"USB0","protocol":"Lemi","baudrate":57600}"#;
        let sensor: SensorDescriptor = serde_json::from_str(json).expect("descriptor");
        assert_eq!(sensor.baudrate, 57600);
        assert_eq!(sensor.parity, "N");
        assert_eq!(sensor.mode, SensorMode::Passive);
        assert_eq!(sensor.batch_factor(), 1);
        assert_eq!(sensor.time_source(), TimeSource::Instrument);
    }

    #[test]
    fn identity_splits_from_the_right() {
        let sensor = SensorDescriptor::new("BM_35_x_123_0001", "ACM0", "Arduino");
        let identity = sensor.identity().expect("identity");
        assert_eq!(identity.name, "BM_35_x");
        assert_eq!(identity.serial, "123");
        assert_eq!(identity.revision, "0001");
        assert_eq!(identity.sensor_id(), "BM_35_x_123_0001");
        assert!(SensorDescriptor::new("LEMI", "USB0", "Lemi").identity().is_none());
    }

    #[test]
    fn zero_stack_acts_as_one() {
        let mut sensor = SensorDescriptor::new("GSM90_1_0001", "USB1", "GSM90");
        sensor.stack = 0;
        sensor.ptime = Some("ntp".to_string());
        assert_eq!(sensor.batch_factor(), 1);
        assert_eq!(sensor.time_source(), TimeSource::Host);
    }
}
