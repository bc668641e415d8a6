//! Quantum POS1 Overhauser 磁力仪。
//!
//! 每帧 44 字节、以 `\0` 结尾：
//! `<F×1000> <?> <σ×1000> [<err>] <MM-DD-YY> <HH:MM:SS.ss>`

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tracing::warn;

use super::{Fixed, order_clocks, parse_number};
use crate::error::{DriverError, ProtocolError};
use crate::line::LineProtocol;
use crate::skew::SkewTracker;

pub const TYPE_CODE: &str = "6hLLhL6hL";
pub const FRAME_TERMINATOR: u8 = 0;
/// POS1 GPS 时间与主机接收时间之间的固有时差（秒）。
pub const GPS_HOST_OFFSET_SECS: f64 = 6.2;

pub struct Pos1Protocol {
    fixed: Fixed,
    skew: SkewTracker,
}

impl Pos1Protocol {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [
            FieldSpec::new("f", "f", "nT", 1000.0),
            FieldSpec::new("var1", "var1", "none", 1.0),
            FieldSpec::new("df", "df", "nT", 1000.0),
            FieldSpec::new("sectime", "GPStime", "none", 1.0),
        ];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
            skew: SkewTracker::new(GPS_HOST_OFFSET_SECS),
        })
    }
}

impl LineProtocol for Pos1Protocol {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 6 {
            return Err(DriverError::decode(format!(
                "expected 6 tokens, found {}",
                tokens.len()
            )));
        }
        let intensity = parse_number(tokens[0], "intensity")? / 1000.0;
        let sigma = parse_number(tokens[2], "sigma")? / 1000.0;
        let err_code = tokens[3]
            .trim_matches(|c| c == '[' || c == ']')
            .parse::<i16>()
            .map_err(|_| DriverError::decode(format!("bad error code {:?}", tokens[3])))?;
        let date = NaiveDate::parse_from_str(tokens[4], "%m-%d-%y")
            .map_err(|_| DriverError::decode(format!("bad date {:?}", tokens[4])))?;
        let time_token: String = tokens[5].chars().take(11).collect();
        let time = NaiveTime::parse_from_str(&time_token, "%H:%M:%S%.f")
            .map_err(|_| DriverError::decode(format!("bad time {time_token:?}")))?;
        let gps = date.and_time(time);

        let observation = self.skew.observe(received_at, gps);
        if observation.warn {
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                delta_secs = observation.delta_secs,
                "large_time_difference"
            );
        }
        if intensity == 0.0 {
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                "zero_intensity_skipped"
            );
            return Ok(Vec::new());
        }

        let (primary, secondary) = order_clocks(&self.fixed.sensor, gps, received_at);
        Ok(vec![self.fixed.reading_with_skew(
            primary,
            vec![
                FieldValue::Number(intensity),
                FieldValue::Number(err_code as f64),
                FieldValue::Number(sigma),
                FieldValue::Time(secondary),
            ],
            &self.skew,
        )])
    }
}
