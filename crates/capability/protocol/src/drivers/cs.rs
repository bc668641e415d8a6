//! 铯光泵磁力仪：`$ value,...` 或单个 `value,...`。

use chrono::NaiveDateTime;
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tracing::debug;

use super::Fixed;
use crate::error::{DriverError, ProtocolError};
use crate::line::LineProtocol;

pub const TYPE_CODE: &str = "6hLL";

/// 量程外或无法解析时写入的值。
pub const OUT_OF_RANGE: f64 = 88888.0;
const VALID_RANGE: (f64, f64) = (10000.0, 100000.0);

pub struct CsProtocol {
    fixed: Fixed,
}

impl CsProtocol {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [FieldSpec::new("f", "f", "nT", 1000.0)];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
        })
    }
}

impl LineProtocol for CsProtocol {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let payload = match tokens.as_slice() {
            [_, payload] => *payload,
            [payload] if payload.contains(',') => *payload,
            _ => return Err(DriverError::decode("not a cs data line")),
        };
        let raw = payload.split(',').next().unwrap_or_default().trim_start_matches('$');
        let intensity = match raw.trim().parse::<f64>() {
            Ok(value) if value > VALID_RANGE.0 && value < VALID_RANGE.1 => value,
            Ok(_) | Err(_) => {
                debug!(
                    target: "magbus.driver",
                    sensor_id = %self.fixed.sensor.sensor_id,
                    raw,
                    "cs_value_out_of_range"
                );
                OUT_OF_RANGE
            }
        };
        Ok(vec![self
            .fixed
            .reading(received_at, vec![FieldValue::Number(intensity)])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::test_support::host_time;

    fn value(cs: &mut CsProtocol, line: &str) -> FieldValue {
        cs.on_line(line, host_time()).expect("line")[0].record.values[0].clone()
    }

    #[test]
    fn valid_and_out_of_range_values() {
        let mut cs = CsProtocol::new(SensorDescriptor::new("CS_1_0001", "S4", "Cs"))
            .expect("cs");
        assert_eq!(value(&mut cs, "$ 48123.456,0042"), FieldValue::Number(48123.456));
        assert_eq!(value(&mut cs, "48123.456,0042"), FieldValue::Number(48123.456));
        assert_eq!(value(&mut cs, "$ 123.4,0"), FieldValue::Number(OUT_OF_RANGE));
        assert_eq!(value(&mut cs, "$ xx,0"), FieldValue::Number(OUT_OF_RANGE));
        assert!(cs.on_line("48123.456", host_time()).is_err());
    }
}
