//! 内置驱动。
//!
//! | 协议 | 类型 | 线上格式 |
//! |------|------|----------|
//! | lemi | 事件 | 153 字节定长二进制帧 |
//! | pos1 | 事件 | `\0` 结尾的 ASCII 帧 |
//! | gsm90 / gsm19 / env / cs | 事件 | ASCII 行 |
//! | arduino | 事件 | 多路复用的 H/M/D 行 |
//! | activearduino | 轮询 | 命令应答的 H/M/D 行 |
//! | test | 轮询 | 主机生成的随机值 |
//! | mysql | 轮询 | MagPy 数据库中的传感器表 |
//! | ow | 轮询 | owserver 上的 OneWire 器件 |

pub mod active_arduino;
pub mod arduino;
pub mod cs;
pub mod env;
pub mod gsm19;
pub mod gsm90;
pub mod lemi;
pub mod mysql;
pub mod onewire;
pub mod pos1;
pub mod test_source;

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use domain::{
    CanonicalRecord, FieldSpec, FieldValue, HeaderDescriptor, Reading, SensorDescriptor,
    TimeSource,
};

use crate::error::{DriverError, ProtocolError};
use crate::skew::SkewTracker;

/// 驱动持有的固定上下文：传感器与头部。
#[derive(Debug, Clone)]
pub(crate) struct Fixed {
    pub sensor: Arc<SensorDescriptor>,
    pub header: Arc<HeaderDescriptor>,
}

impl Fixed {
    pub fn new(
        sensor: SensorDescriptor,
        fields: &[FieldSpec],
        type_code: &str,
    ) -> Result<Self, ProtocolError> {
        let header = HeaderDescriptor::new(sensor.sensor_id.as_str(), fields, type_code)?;
        // 启动期即校验类型码与键列表一致
        magbus_codec::RecordLayout::from_header(&header)?;
        Ok(Self {
            sensor: Arc::new(sensor),
            header: Arc::new(header),
        })
    }

    pub fn reading(&self, timestamp: NaiveDateTime, values: Vec<FieldValue>) -> Reading {
        Reading {
            sensor: self.sensor.clone(),
            header: self.header.clone(),
            record: CanonicalRecord::new(timestamp, values),
            extras: Vec::new(),
        }
    }

    /// 带时钟偏差字典项的读数。
    pub fn reading_with_skew(
        &self,
        timestamp: NaiveDateTime,
        values: Vec<FieldValue>,
        skew: &SkewTracker,
    ) -> Reading {
        let mut reading = self.reading(timestamp, values);
        reading
            .extras
            .push(("DataNTPTimeDelay".to_string(), skew.dict_value()));
        reading
    }
}

/// 按 ptime 选择主时间；返回 (主时间, 次时间)。
pub(crate) fn order_clocks(
    sensor: &SensorDescriptor,
    instrument: NaiveDateTime,
    host: NaiveDateTime,
) -> (NaiveDateTime, NaiveDateTime) {
    match sensor.time_source() {
        TimeSource::Instrument => (instrument, host),
        TimeSource::Host => (host, instrument),
    }
}

/// 解析 `HHMMSS` 或 `HHMMSS.f`。
pub(crate) fn parse_compact_time(token: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(token, "%H%M%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(token, "%H%M%S"))
        .ok()
}

pub(crate) fn at(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}

pub(crate) fn parse_number(token: &str, what: &str) -> Result<f64, DriverError> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| DriverError::decode(format!("{what} is not a number: {token:?}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, NaiveDateTime};

    pub fn host_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_micro_opt(12, 0, 1, 500_000))
            .expect("host time")
    }

    pub fn at(h: u32, m: u32, s: u32, us: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_micro_opt(h, m, s, us))
            .expect("time")
    }
}
