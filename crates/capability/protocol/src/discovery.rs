//! 子传感器动态发现
//!
//! 一块板卡在同一端口上复用多个逻辑传感器，以行前缀区分：
//!
//! ```text
//! H<n>: key_Element [unit],...          头部行
//! M<n>: SensorName: x, SensorID: y, ... 身份行
//! D<n>: v,...                           数据行
//! ```
//!
//! 同一 `<n>` 的头部行与身份行都到齐后，按目录核对：
//! 已知则校验通过，未知则登记，编号被其他传感器占用则记为完整性错误。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use domain::{
    CanonicalRecord, FieldSpec, FieldValue, HeaderDescriptor, Reading, SensorDescriptor, key_index,
};
use tracing::{debug, error, info};

use crate::catalog::SensorCatalog;
use crate::error::DriverError;

/// 子传感器数值的定点乘数。
pub const SUB_SENSOR_MULTIPLIER: f64 = 10000.0;

const DEFAULT_SERIAL: &str = "12345";
const DEFAULT_REVISION: &str = "0001";

/// 一次头部/身份行处理的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryOutcome {
    /// 等待另一半信息
    Pending,
    /// 新登记到目录
    Registered(String),
    /// 与目录一致
    Verified(String),
    /// 编号已被目录中的另一传感器占用
    Mismatch { sensor_id: String, existing: String },
}

/// 板卡单行的处理结果。
#[derive(Debug, Clone)]
pub enum BoardEvent {
    Ignored,
    Discovery(DiscoveryOutcome),
    Reading(Reading),
}

#[derive(Debug, Clone)]
struct HeaderLine {
    fields: Vec<FieldSpec>,
    /// 规范顺序下第 i 个字段对应的原始列
    columns: Vec<usize>,
}

#[derive(Debug, Clone)]
struct IdentityLine {
    name: String,
    serial: String,
    revision: String,
    pier: Option<String>,
    group: Option<String>,
    description: Option<String>,
    time_protocol: Option<String>,
}

#[derive(Debug, Clone)]
struct VerifiedSensor {
    sensor: Arc<SensorDescriptor>,
    header: Arc<HeaderDescriptor>,
    columns: Vec<usize>,
}

/// 一块板卡的发现状态。
pub struct SubSensorDiscovery {
    board: SensorDescriptor,
    catalog: SensorCatalog,
    headers: HashMap<String, HeaderLine>,
    identities: HashMap<String, IdentityLine>,
    verified: HashMap<String, VerifiedSensor>,
}

impl SubSensorDiscovery {
    pub fn new(board: SensorDescriptor, catalog: SensorCatalog) -> Self {
        Self {
            board,
            catalog,
            headers: HashMap::new(),
            identities: HashMap::new(),
            verified: HashMap::new(),
        }
    }

    pub fn board(&self) -> &SensorDescriptor {
        &self.board
    }

    /// 已校验的子传感器 ID。
    pub fn verified_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .verified
            .values()
            .map(|v| v.sensor.sensor_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// 处理一行板卡输出。
    pub fn handle_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<BoardEvent, DriverError> {
        let Some((kind, sub_id, body)) = split_prefix(line) else {
            debug!(
                target: "magbus.driver",
                board = %self.board.sensor_id,
                line,
                "board_line_ignored"
            );
            return Ok(BoardEvent::Ignored);
        };
        match kind {
            'H' => {
                let header = parse_header_line(body)?;
                self.headers.insert(sub_id.to_string(), header);
                Ok(BoardEvent::Discovery(self.try_complete(sub_id)?))
            }
            'M' => {
                let identity = parse_identity_line(body)?;
                self.identities.insert(sub_id.to_string(), identity);
                Ok(BoardEvent::Discovery(self.try_complete(sub_id)?))
            }
            _ => Ok(match self.data(sub_id, body, received_at)? {
                Some(reading) => BoardEvent::Reading(reading),
                None => BoardEvent::Ignored,
            }),
        }
    }

    fn try_complete(&mut self, sub_id: &str) -> Result<DiscoveryOutcome, DriverError> {
        let (Some(header), Some(identity)) = (self.headers.get(sub_id), self.identities.get(sub_id))
        else {
            return Ok(DiscoveryOutcome::Pending);
        };
        let header = header.clone();
        let identity = identity.clone();
        let sensor_id = format!("{}_{}_{}", identity.name, identity.serial, identity.revision);

        let outcome = match self.catalog.get(&sensor_id).map_err(catalog_error)? {
            Some(existing) => {
                if existing.path.as_deref() != Some(sub_id) {
                    self.catalog
                        .relocate(&sensor_id, sub_id)
                        .map_err(catalog_error)?;
                }
                debug!(
                    target: "magbus.driver",
                    sensor_id = %sensor_id,
                    path = sub_id,
                    "sub_sensor_verified"
                );
                DiscoveryOutcome::Verified(sensor_id.clone())
            }
            None => {
                let occupant = self
                    .catalog
                    .on_board(&self.board.sensor_id)
                    .map_err(catalog_error)?
                    .into_iter()
                    .find(|s| s.path.as_deref() == Some(sub_id));
                match occupant {
                    Some(existing) => {
                        error!(
                            target: "magbus.driver",
                            board = %self.board.sensor_id,
                            path = sub_id,
                            sensor_id = %sensor_id,
                            existing = %existing.sensor_id,
                            "sub_sensor_integrity_mismatch"
                        );
                        self.verified.remove(sub_id);
                        self.headers.remove(sub_id);
                        self.identities.remove(sub_id);
                        return Ok(DiscoveryOutcome::Mismatch {
                            sensor_id,
                            existing: existing.sensor_id,
                        });
                    }
                    None => {
                        let sensor = self.describe(&sensor_id, sub_id, &identity);
                        self.catalog.register(sensor).map_err(catalog_error)?;
                        info!(
                            target: "magbus.driver",
                            board = %self.board.sensor_id,
                            sensor_id = %sensor_id,
                            path = sub_id,
                            "sub_sensor_registered"
                        );
                        DiscoveryOutcome::Registered(sensor_id.clone())
                    }
                }
            }
        };

        let sensor = self
            .catalog
            .get(&sensor_id)
            .map_err(catalog_error)?
            .unwrap_or_else(|| self.describe(&sensor_id, sub_id, &identity));
        let descriptor = HeaderDescriptor::new(
            sensor_id.as_str(),
            &header.fields,
            type_code(header.fields.len()),
        )
        .map_err(|e| DriverError::decode(e.to_string()))?;
        self.verified
            .retain(|path, v| path == sub_id || v.sensor.sensor_id != sensor_id);
        self.verified.insert(
            sub_id.to_string(),
            VerifiedSensor {
                sensor: Arc::new(sensor),
                header: Arc::new(descriptor),
                columns: header.columns,
            },
        );
        Ok(outcome)
    }

    fn describe(&self, sensor_id: &str, sub_id: &str, identity: &IdentityLine) -> SensorDescriptor {
        let mut sensor = SensorDescriptor::new(
            sensor_id,
            self.board.sensor_id.as_str(),
            self.board.protocol.as_str(),
        );
        sensor.path = Some(sub_id.to_string());
        sensor.stack = self.board.stack;
        sensor.mode = self.board.mode;
        sensor.poll_rate_secs = self.board.poll_rate_secs;
        sensor.pier_id = identity.pier.clone().or_else(|| self.board.pier_id.clone());
        sensor.group = identity.group.clone();
        sensor.description = identity.description.clone();
        sensor.ptime = Some(identity.time_protocol.clone().unwrap_or_else(|| "NTP".to_string()));
        sensor
    }

    fn data(
        &self,
        sub_id: &str,
        body: &str,
        received_at: NaiveDateTime,
    ) -> Result<Option<Reading>, DriverError> {
        let Some(verified) = self.verified.get(sub_id) else {
            debug!(
                target: "magbus.driver",
                board = %self.board.sensor_id,
                path = sub_id,
                "unverified_sub_sensor_data"
            );
            return Ok(None);
        };
        let raw: Vec<f64> = body
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| DriverError::decode(format!("non-numeric value {v:?}")))
            })
            .collect::<Result<_, _>>()?;
        if raw.len() != verified.columns.len() {
            return Err(DriverError::decode(format!(
                "{} values for {} columns",
                raw.len(),
                verified.columns.len()
            )));
        }
        let values = verified
            .columns
            .iter()
            .map(|column| FieldValue::Number(raw[*column]))
            .collect();
        Ok(Some(Reading {
            sensor: verified.sensor.clone(),
            header: verified.header.clone(),
            record: CanonicalRecord::new(received_at, values),
            extras: Vec::new(),
        }))
    }
}

fn catalog_error(err: crate::error::ProtocolError) -> DriverError {
    DriverError::decode(err.to_string())
}

fn type_code(columns: usize) -> String {
    format!("6hL{}", "l".repeat(columns))
}

// "H1: ..." -> ('H', "1", "...")
fn split_prefix(line: &str) -> Option<(char, &str, &str)> {
    let (head, body) = line.split_once(':')?;
    let mut chars = head.trim().chars();
    let kind = chars.next()?;
    if !matches!(kind, 'H' | 'M' | 'D') {
        return None;
    }
    let sub_id = head.trim()[1..].trim();
    if sub_id.is_empty() || !sub_id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((kind, sub_id, body.trim()))
}

fn parse_header_line(body: &str) -> Result<HeaderLine, DriverError> {
    let mut columns: Vec<(usize, FieldSpec)> = Vec::new();
    for (column, entry) in body.split(',').enumerate() {
        let (name, unit) = entry
            .trim()
            .trim_end_matches(']')
            .split_once('[')
            .ok_or_else(|| DriverError::decode(format!("header entry without unit: {entry:?}")))?;
        let (key, element) = name
            .trim()
            .split_once('_')
            .ok_or_else(|| DriverError::decode(format!("header entry without key: {entry:?}")))?;
        let key = key.trim().to_lowercase();
        if key_index(&key).is_none() {
            return Err(DriverError::decode(format!("unknown key {key}")));
        }
        let unit = unit.trim().replace("deg C", "degC");
        columns.push((
            column,
            FieldSpec::new(&key, element.trim(), &unit, SUB_SENSOR_MULTIPLIER),
        ));
    }
    columns.sort_by_key(|(_, field)| key_index(&field.key));
    Ok(HeaderLine {
        columns: columns.iter().map(|(column, _)| *column).collect(),
        fields: columns.into_iter().map(|(_, field)| field).collect(),
    })
}

fn parse_identity_line(body: &str) -> Result<IdentityLine, DriverError> {
    let mut entries: HashMap<&str, &str> = HashMap::new();
    for pair in body.split(',') {
        if let Some((key, value)) = pair.split_once(':') {
            entries.insert(key.trim(), value.trim());
        }
    }
    let name = entries
        .get("SensorName")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DriverError::decode("identity line without SensorName"))?;
    let owned = |key: &str| entries.get(key).map(|v| v.to_string());
    Ok(IdentityLine {
        name: name.to_string(),
        serial: owned("SensorID").unwrap_or_else(|| DEFAULT_SERIAL.to_string()),
        revision: owned("SensorRevision").unwrap_or_else(|| DEFAULT_REVISION.to_string()),
        pier: owned("DataPier"),
        group: owned("SensorGroup"),
        description: owned("SensorDescription"),
        time_protocol: owned("DataTimeProtocol"),
    })
}
