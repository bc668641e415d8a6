//! GEM GSM90 Overhauser 磁力仪。
//!
//! 三种行格式：
//! - `MM-DD-YYYY HHMMSS[.f] F err`
//! - `HHMMSS.f F err`（v7，日期取主机当天）
//! - `F`（仅总场）

use chrono::{NaiveDate, NaiveDateTime};
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tracing::warn;

use super::{Fixed, at, order_clocks, parse_compact_time, parse_number};
use crate::error::{DriverError, ProtocolError};
use crate::line::LineProtocol;
use crate::skew::SkewTracker;

pub const TYPE_CODE: &str = "6hLLL6hL";

pub struct Gsm90Protocol {
    fixed: Fixed,
    skew: SkewTracker,
}

impl Gsm90Protocol {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [
            FieldSpec::new("f", "f", "nT", 1000.0),
            FieldSpec::new("var1", "errorcode", "none", 1.0),
            FieldSpec::new("sectime", "internaltime", "none", 1.0),
        ];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
            skew: SkewTracker::new(0.0),
        })
    }
}

impl LineProtocol for Gsm90Protocol {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (intensity, err_code, internal) = match tokens.as_slice() {
            [date, time, f, err] => {
                let internal = NaiveDate::parse_from_str(date, "%m-%d-%Y")
                    .ok()
                    .zip(parse_compact_time(time))
                    .map(|(d, t)| at(d, t));
                (parse_number(f, "intensity")?, parse_err(err)?, internal)
            }
            [time, f, err] => {
                let internal = parse_compact_time(time).map(|t| at(received_at.date(), t));
                (parse_number(f, "intensity")?, parse_err(err)?, internal)
            }
            [f, ..] => (parse_number(f, "intensity")?, 0, None),
            [] => return Err(DriverError::decode("empty line")),
        };

        let internal = internal.unwrap_or(received_at);
        let observation = self.skew.observe(received_at, internal);
        if observation.warn {
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                delta_secs = observation.delta_secs,
                "large_time_difference"
            );
        }
        let (primary, secondary) = order_clocks(&self.fixed.sensor, internal, received_at);
        Ok(vec![self.fixed.reading_with_skew(
            primary,
            vec![
                FieldValue::Number(intensity),
                FieldValue::Number(err_code as f64),
                FieldValue::Time(secondary),
            ],
            &self.skew,
        )])
    }
}

fn parse_err(token: &str) -> Result<u32, DriverError> {
    token
        .parse::<u32>()
        .map_err(|_| DriverError::decode(format!("error code is not an integer: {token:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::test_support::{at as time_at, host_time};

    fn protocol(ptime: Option<&str>) -> Gsm90Protocol {
        let mut sensor = SensorDescriptor::new("GSM90_6107631_0001", "S1", "GSM90");
        sensor.ptime = ptime.map(str::to_string);
        Gsm90Protocol::new(sensor).expect("gsm90")
    }

    #[test]
    fn full_line_uses_instrument_time() {
        let mut gsm = protocol(None);
        let readings = gsm
            .on_line("05-01-2024 120001.0 48464.53 99", host_time())
            .expect("line");
        let record = &readings[0].record;
        assert_eq!(record.timestamp, time_at(12, 0, 1, 0));
        assert_eq!(record.values[0], FieldValue::Number(48464.53));
        assert_eq!(record.values[1], FieldValue::Number(99.0));
        assert_eq!(record.values[2], FieldValue::Time(host_time()));
        assert!(readings[0].extras.iter().any(|(k, _)| k == "DataNTPTimeDelay"));
    }

    #[test]
    fn v7_line_takes_host_date() {
        let mut gsm = protocol(Some("NTP"));
        let readings = gsm.on_line("115959.5 48464.53 0", host_time()).expect("line");
        let record = &readings[0].record;
        assert_eq!(record.timestamp, host_time());
        assert_eq!(record.values[2], FieldValue::Time(time_at(11, 59, 59, 500_000)));
    }

    #[test]
    fn bare_intensity_and_garbage() {
        let mut gsm = protocol(None);
        let readings = gsm.on_line("48464.53", host_time()).expect("line");
        assert_eq!(readings[0].record.timestamp, host_time());
        assert!(matches!(
            gsm.on_line("abc", host_time()),
            Err(DriverError::Decode(_))
        ));
    }
}
