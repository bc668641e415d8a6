//! GEM GSM19 Overhauser 磁力仪（基站/梯度模式）。
//!
//! 行格式 `HHMMSS.f F [err|gradient]`。老固件在连续运行时小时数会超过 24
//! （如 `410356.0` 表示 17:03:56），按 24 取模。

use chrono::{NaiveDateTime, NaiveTime};
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tracing::warn;

use super::{Fixed, at, order_clocks, parse_compact_time, parse_number};
use crate::error::{DriverError, ProtocolError};
use crate::line::LineProtocol;
use crate::skew::SkewTracker;

pub const TYPE_CODE: &str = "6hLLl6hL";

/// 只有时间和总场时使用的错误码。
const MISSING_ERROR_CODE: f64 = 99.0;

pub struct Gsm19Protocol {
    fixed: Fixed,
    skew: SkewTracker,
}

impl Gsm19Protocol {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [
            FieldSpec::new("f", "f", "nT", 1000.0),
            FieldSpec::new("var1", "err", "none", 1000.0),
            FieldSpec::new("sectime", "sectime", "none", 1.0),
        ];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
            skew: SkewTracker::new(0.0),
        })
    }
}

impl LineProtocol for Gsm19Protocol {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (time, intensity, third) = match tokens.as_slice() {
            [time, f] => (*time, parse_number(f, "intensity")?, None),
            [time, f, third] => (*time, parse_number(f, "intensity")?, Some(*third)),
            _ => {
                return Err(DriverError::decode(format!(
                    "expected 2 or 3 tokens, found {}",
                    tokens.len()
                )));
            }
        };
        // 三位字符是错误码，否则是梯度值
        let var1 = match third {
            None => MISSING_ERROR_CODE,
            Some(token) => parse_number(token, "error code or gradient")?,
        };

        let instrument = folded_time(time)
            .map(|t| at(received_at.date(), t))
            .unwrap_or(received_at);
        let observation = self.skew.observe(received_at, instrument);
        if observation.warn {
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                delta_secs = observation.delta_secs,
                "large_time_difference"
            );
        }
        let (primary, secondary) = order_clocks(&self.fixed.sensor, instrument, received_at);
        Ok(vec![self.fixed.reading_with_skew(
            primary,
            vec![
                FieldValue::Number(intensity),
                FieldValue::Number(var1),
                FieldValue::Time(secondary),
            ],
            &self.skew,
        )])
    }
}

fn folded_time(token: &str) -> Option<NaiveTime> {
    if let Some(time) = parse_compact_time(token) {
        return Some(time);
    }
    let (whole, fraction) = token.split_once('.').unwrap_or((token, ""));
    if whole.len() < 6 || !whole.is_ascii() {
        return None;
    }
    let split = whole.len() - 4;
    let hours: u32 = whole[..split].parse().ok()?;
    let folded = if fraction.is_empty() {
        format!("{:02}{}", hours % 24, &whole[split..])
    } else {
        format!("{:02}{}.{}", hours % 24, &whole[split..], fraction)
    };
    parse_compact_time(&folded)
}
