//! 运行配置加载
//!
//! - 站点与总线配置来自 `MAGBUS_*` 环境变量（调用方先加载 `.env`）
//! - 传感器清单来自 JSON 文件（[`SensorDescriptor`] 数组）

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use domain::SensorDescriptor;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("sensor list {path}: {reason}")]
    Sensors { path: String, reason: String },
}

/// 总线连接参数。
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub qos: u8,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 采集端配置。
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub station: String,
    pub mqtt: MqttConfig,
    pub buffer_dir: Option<PathBuf>,
    pub serial_prefix: String,
    pub poll_timeout: Duration,
    pub restart_backoff: Duration,
    pub sensors_file: PathBuf,
    /// mysql 驱动的默认连接串（含凭据）
    pub mysql_url: Option<String>,
}

/// 收集端启用的 Sink。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Log,
    File,
}

/// 收集端配置。
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub mqtt: MqttConfig,
    /// `all` 或单个站点
    pub collect_station: String,
    pub sinks: Vec<SinkKind>,
    pub archive_dir: Option<PathBuf>,
    /// 原样保留，由收集端解析
    pub mismatch_policy: String,
    pub sink_queue: usize,
}

/// 变量读取来源；测试中可替换为内存表。
trait Lookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

impl MqttConfig {
    fn load(lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        let qos = read_with_default(lookup, "MAGBUS_MQTT_QOS", 0u8)?;
        if qos > 2 {
            return Err(ConfigError::Invalid(
                "MAGBUS_MQTT_QOS".to_string(),
                qos.to_string(),
            ));
        }
        Ok(Self {
            host: read_optional(lookup, "MAGBUS_MQTT_HOST")
                .unwrap_or_else(|| "localhost".to_string()),
            port: read_with_default(lookup, "MAGBUS_MQTT_PORT", 1883u16)?,
            qos,
            client_id: read_optional(lookup, "MAGBUS_MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("magbus-{}", uuid::Uuid::new_v4().simple())),
            username: read_optional(lookup, "MAGBUS_MQTT_USERNAME"),
            password: read_optional(lookup, "MAGBUS_MQTT_PASSWORD"),
        })
    }
}

impl AcquisitionConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&process_env)
    }

    /// 从任意键值来源读取配置。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load(&lookup)
    }

    fn load(lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        let station = read_optional(lookup, "MAGBUS_STATION")
            .ok_or_else(|| ConfigError::Missing("MAGBUS_STATION".to_string()))?;
        if station.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid("MAGBUS_STATION".to_string(), station));
        }
        Ok(Self {
            station,
            mqtt: MqttConfig::load(lookup)?,
            buffer_dir: read_optional(lookup, "MAGBUS_BUFFER_DIR").map(PathBuf::from),
            serial_prefix: read_optional(lookup, "MAGBUS_SERIAL_PREFIX")
                .unwrap_or_else(|| "/dev/tty".to_string()),
            poll_timeout: Duration::from_millis(read_with_default(
                lookup,
                "MAGBUS_POLL_TIMEOUT_MS",
                5000u64,
            )?),
            restart_backoff: Duration::from_millis(read_with_default(
                lookup,
                "MAGBUS_RESTART_BACKOFF_MS",
                5000u64,
            )?),
            sensors_file: read_optional(lookup, "MAGBUS_SENSORS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sensors.json")),
            mysql_url: read_optional(lookup, "MAGBUS_MYSQL_URL"),
        })
    }
}

impl CollectorConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load(&lookup)
    }

    fn load(lookup: &dyn Lookup) -> Result<Self, ConfigError> {
        let sinks = parse_sinks(
            &read_optional(lookup, "MAGBUS_SINKS").unwrap_or_else(|| "log".to_string()),
        )?;
        let archive_dir = read_optional(lookup, "MAGBUS_ARCHIVE_DIR").map(PathBuf::from);
        if sinks.contains(&SinkKind::File) && archive_dir.is_none() {
            return Err(ConfigError::Missing("MAGBUS_ARCHIVE_DIR".to_string()));
        }
        let sink_queue = read_with_default(lookup, "MAGBUS_SINK_QUEUE", 1024usize)?;
        if sink_queue == 0 {
            return Err(ConfigError::Invalid(
                "MAGBUS_SINK_QUEUE".to_string(),
                "0".to_string(),
            ));
        }
        Ok(Self {
            mqtt: MqttConfig::load(lookup)?,
            collect_station: read_optional(lookup, "MAGBUS_COLLECT_STATION")
                .unwrap_or_else(|| "all".to_string()),
            sinks,
            archive_dir,
            mismatch_policy: read_optional(lookup, "MAGBUS_MISMATCH_POLICY")
                .unwrap_or_else(|| "isolate".to_string()),
            sink_queue,
        })
    }
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_sinks(value: &str) -> Result<Vec<SinkKind>, ConfigError> {
    let mut sinks = Vec::new();
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let kind = match name.to_ascii_lowercase().as_str() {
            "log" => SinkKind::Log,
            "file" => SinkKind::File,
            _ => return Err(ConfigError::Invalid("MAGBUS_SINKS".to_string(), value.to_string())),
        };
        if !sinks.contains(&kind) {
            sinks.push(kind);
        }
    }
    if sinks.is_empty() {
        return Err(ConfigError::Invalid("MAGBUS_SINKS".to_string(), value.to_string()));
    }
    Ok(sinks)
}

/// 读取 JSON 传感器清单；sensorid 必须唯一。
pub fn load_sensors(path: impl AsRef<Path>) -> Result<Vec<SensorDescriptor>, ConfigError> {
    let path = path.as_ref();
    let failed = |reason: String| ConfigError::Sensors {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
    let sensors: Vec<SensorDescriptor> =
        serde_json::from_str(&raw).map_err(|e| failed(e.to_string()))?;
    let mut seen = HashSet::new();
    for sensor in &sensors {
        if !seen.insert(sensor.sensor_id.as_str()) {
            return Err(failed(format!("duplicate sensorid {}", sensor.sensor_id)));
        }
    }
    Ok(sensors)
}

fn read_optional(lookup: &dyn Lookup, key: &str) -> Option<String> {
    match lookup.get(key) {
        Some(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn read_with_default<T: std::str::FromStr>(
    lookup: &dyn Lookup,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    let value = match read_optional(lookup, key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}
