//! OneWire 总线：经 owserver 读取 DS18x20 / DS2438 器件。
//!
//! 板卡描述的 `port` 为 `tcp://host:port` 时连接该 owserver，否则连接本机 4304。
//! 每个 tick 重新列出总线；新器件以 `<类型>_<ID>_0001` 登记到目录，
//! `path` 记录其总线路径。时间取主机时钟。

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use chrono::NaiveDateTime;
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Fixed, parse_number};
use crate::catalog::SensorCatalog;
use crate::driver::{PolledDriver, RequestTransport};
use crate::error::{DriverError, ProtocolError, TransportError};

pub const DEFAULT_OWSERVER: &str = "localhost:4304";
/// OneWire 数值的定点乘数。
pub const ONEWIRE_MULTIPLIER: f64 = 1000.0;

const URL_SCHEME: &str = "tcp://";
const REVISION: &str = "0001";
// USB 适配器本身也出现在总线上
const ADAPTER_TYPE: &str = "DS1420";
const OW_TIMEOUT: Duration = Duration::from_secs(5);

const MSG_READ: i32 = 2;
const MSG_DIRALL: i32 = 7;
const HEADER_LEN: usize = 24;
const READ_SIZE: i32 = 8192;
const MAX_PAYLOAD: i32 = 65536;

/// 一种器件要读取的参数：(owserver 参数名, 键, 元素, 单位)。
type Parameter = (&'static str, &'static str, &'static str, &'static str);

const DS18_PARAMETERS: &[Parameter] = &[("temperature", "t1", "T", "degC")];
const DS2438_PARAMETERS: &[Parameter] = &[
    ("temperature", "t1", "T", "degC"),
    ("humidity", "var1", "RH", "per"),
    ("VDD", "var2", "VDD", "V"),
    ("VAD", "var3", "VAD", "V"),
    ("vis", "var4", "VIS", "V"),
];

/// 器件类型对应的参数表；未知类型返回 None。
pub fn device_parameters(device_type: &str) -> Option<&'static [Parameter]> {
    match device_type {
        "DS18B20" | "DS18S20" => Some(DS18_PARAMETERS),
        "DS2438" => Some(DS2438_PARAMETERS),
        _ => None,
    }
}

/// owserver 的目录与读取操作。
#[async_trait]
pub trait OneWireBus: Send + Sync {
    /// 根目录下的器件路径，如 `/28.A1B2C3D4E5F6/`。
    async fn list(&self) -> Result<Vec<String>, DriverError>;

    async fn read(&self, path: &str) -> Result<String, DriverError>;
}

/// owserver 网络协议的请求报文：6 个大端 i32 头部后接以 NUL 结尾的路径。
pub fn encode_request(message_type: i32, path: &str) -> Vec<u8> {
    let payload = path.len() + 1;
    let mut header = [0u8; HEADER_LEN];
    BigEndian::write_i32_into(
        &[0, payload as i32, message_type, 0, READ_SIZE, 0],
        &mut header,
    );
    let mut out = Vec::with_capacity(HEADER_LEN + payload);
    out.extend_from_slice(&header);
    out.extend_from_slice(path.as_bytes());
    out.push(0);
    out
}

/// 应答头部的关键字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// 负数表示保活包
    pub payload: i32,
    /// 负数为 owserver 错误码
    pub ret: i32,
    pub size: i32,
}

pub fn parse_reply_header(bytes: &[u8; HEADER_LEN]) -> ReplyHeader {
    let mut fields = [0i32; 6];
    BigEndian::read_i32_into(bytes, &mut fields);
    ReplyHeader {
        payload: fields[1],
        ret: fields[2],
        size: fields[4],
    }
}

/// 逗号分隔的目录列表，去掉结尾的 NUL。
pub fn parse_dir_listing(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.ends_with('/') {
                entry.to_string()
            } else {
                format!("{entry}/")
            }
        })
        .collect()
}

/// 每次操作新建一条连接的 owserver 客户端。
pub struct OwServerClient {
    address: String,
}

impl OwServerClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    async fn request(&self, message_type: i32, path: &str) -> Result<Vec<u8>, DriverError> {
        timeout(OW_TIMEOUT, self.exchange(message_type, path))
            .await
            .map_err(|_| TransportError::Timeout(format!("owserver {}", self.address)))?
    }

    async fn exchange(&self, message_type: i32, path: &str) -> Result<Vec<u8>, DriverError> {
        let mut stream = TcpStream::connect(&self.address).await.map_err(|e| {
            TransportError::Open {
                target: self.address.clone(),
                reason: e.to_string(),
            }
        })?;
        stream
            .write_all(&encode_request(message_type, path))
            .await
            .map_err(TransportError::from)?;
        loop {
            let mut raw = [0u8; HEADER_LEN];
            stream.read_exact(&mut raw).await.map_err(TransportError::from)?;
            let header = parse_reply_header(&raw);
            if header.payload < 0 {
                continue;
            }
            if header.ret < 0 {
                return Err(DriverError::source_failed(format!(
                    "owserver error {} for {path}",
                    header.ret
                )));
            }
            if header.payload > MAX_PAYLOAD {
                return Err(DriverError::source_failed(format!(
                    "owserver payload too large: {}",
                    header.payload
                )));
            }
            let mut payload = vec![0u8; header.payload as usize];
            stream
                .read_exact(&mut payload)
                .await
                .map_err(TransportError::from)?;
            if message_type == MSG_READ {
                payload.truncate(header.size.clamp(0, header.payload) as usize);
            }
            return Ok(payload);
        }
    }
}

#[async_trait]
impl OneWireBus for OwServerClient {
    async fn list(&self) -> Result<Vec<String>, DriverError> {
        let payload = self.request(MSG_DIRALL, "/").await?;
        Ok(parse_dir_listing(&payload))
    }

    async fn read(&self, path: &str) -> Result<String, DriverError> {
        let payload = self.request(MSG_READ, path).await?;
        Ok(String::from_utf8_lossy(&payload).trim().to_string())
    }
}

/// 总线路径 `/28.A1B2C3/` 对应的器件 ID。
pub fn device_id(path: &str) -> String {
    path.chars().filter(|c| *c != '/' && *c != '.').collect()
}

struct Device {
    fixed: Fixed,
    path: String,
    parameters: &'static [Parameter],
}

/// OneWire 轮询驱动。
pub struct OneWireDriver {
    board: SensorDescriptor,
    catalog: SensorCatalog,
    bus: Box<dyn OneWireBus>,
    devices: HashMap<String, Device>,
    /// 目录中登记但总线上未找到的路径
    missing: BTreeSet<String>,
}

impl OneWireDriver {
    pub fn new(board: SensorDescriptor, catalog: SensorCatalog, bus: Box<dyn OneWireBus>) -> Self {
        Self {
            board,
            catalog,
            bus,
            devices: HashMap::new(),
            missing: BTreeSet::new(),
        }
    }

    /// 板卡端口中的 owserver 地址。
    pub fn server_address(board: &SensorDescriptor) -> String {
        board
            .port
            .strip_prefix(URL_SCHEME)
            .filter(|addr| !addr.is_empty())
            .unwrap_or(DEFAULT_OWSERVER)
            .to_string()
    }

    /// 当前在总线上缺失的已登记路径。
    pub fn missing_paths(&self) -> Vec<String> {
        self.missing.iter().cloned().collect()
    }

    // 对照目录检查缺失与恢复的器件，只在状态变化时记录日志
    fn track_missing(&mut self, present: &[String]) -> Result<(), DriverError> {
        let known = self
            .catalog
            .on_board(&self.board.sensor_id)
            .map_err(|e| DriverError::source_failed(e.to_string()))?;
        for sensor in known {
            let Some(path) = sensor.path else { continue };
            if present.contains(&path) {
                if self.missing.remove(&path) {
                    info!(
                        target: "magbus.driver",
                        board = %self.board.sensor_id,
                        path = %path,
                        "onewire_sensor_back"
                    );
                }
            } else if self.missing.insert(path.clone()) {
                warn!(
                    target: "magbus.driver",
                    board = %self.board.sensor_id,
                    sensor_id = %sensor.sensor_id,
                    path = %path,
                    "onewire_sensor_missing"
                );
            }
        }
        Ok(())
    }

    async fn attach(&mut self, path: &str) -> Result<(), DriverError> {
        if self.devices.contains_key(path) {
            return Ok(());
        }
        let device_type = self.bus.read(&format!("{path}type")).await?;
        if device_type == ADAPTER_TYPE {
            return Ok(());
        }
        let Some(parameters) = device_parameters(&device_type) else {
            debug!(
                target: "magbus.driver",
                path = %path,
                device_type = %device_type,
                "onewire_device_unsupported"
            );
            return Ok(());
        };

        let existing = self
            .catalog
            .on_board(&self.board.sensor_id)
            .map_err(|e| DriverError::source_failed(e.to_string()))?
            .into_iter()
            .find(|s| s.path.as_deref() == Some(path));
        let sensor = match existing {
            Some(sensor) => sensor,
            None => {
                let sensor_id = format!("{device_type}_{}_{REVISION}", device_id(path));
                let mut sensor = SensorDescriptor::new(
                    sensor_id,
                    self.board.sensor_id.as_str(),
                    self.board.protocol.as_str(),
                );
                sensor.path = Some(path.to_string());
                sensor.mode = self.board.mode;
                sensor.stack = self.board.stack;
                sensor.poll_rate_secs = self.board.poll_rate_secs;
                sensor.group = self.board.group.clone();
                sensor.pier_id = self.board.pier_id.clone();
                sensor.ptime = Some("NTP".to_string());
                self.catalog
                    .register(sensor.clone())
                    .map_err(|e| DriverError::source_failed(e.to_string()))?;
                sensor
            }
        };

        let fields: Vec<FieldSpec> = parameters
            .iter()
            .map(|(_, key, element, unit)| FieldSpec::new(key, element, unit, ONEWIRE_MULTIPLIER))
            .collect();
        let type_code = format!("6hL{}", "l".repeat(fields.len()));
        let fixed = Fixed::new(sensor, &fields, &type_code)
            .map_err(|e: ProtocolError| DriverError::decode(e.to_string()))?;
        self.devices.insert(
            path.to_string(),
            Device {
                fixed,
                path: path.to_string(),
                parameters,
            },
        );
        Ok(())
    }

    async fn read_device(
        bus: &dyn OneWireBus,
        device: &Device,
        now: NaiveDateTime,
    ) -> Result<Reading, DriverError> {
        let mut values = Vec::with_capacity(device.parameters.len());
        for (parameter, ..) in device.parameters {
            let raw = bus.read(&format!("{}{parameter}", device.path)).await?;
            values.push(FieldValue::Number(parse_number(&raw, parameter)?));
        }
        Ok(device.fixed.reading(now, values))
    }
}

#[async_trait]
impl PolledDriver for OneWireDriver {
    fn sensor(&self) -> &SensorDescriptor {
        &self.board
    }

    fn uses_transport(&self) -> bool {
        false
    }

    async fn poll(
        &mut self,
        _transport: &mut dyn RequestTransport,
        now: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let present = self.bus.list().await?;
        self.track_missing(&present)?;
        for path in &present {
            if let Err(err) = self.attach(path).await {
                warn!(
                    target: "magbus.driver",
                    board = %self.board.sensor_id,
                    path = %path,
                    error = %err,
                    "onewire_attach_failed"
                );
            }
        }

        let mut readings = Vec::new();
        for path in &present {
            let Some(device) = self.devices.get(path) else {
                continue;
            };
            match Self::read_device(self.bus.as_ref(), device, now).await {
                Ok(reading) => readings.push(reading),
                Err(err) => warn!(
                    target: "magbus.driver",
                    sensor_id = %device.fixed.sensor.sensor_id,
                    error = %err,
                    "onewire_read_failed"
                ),
            }
        }
        Ok(readings)
    }
}
