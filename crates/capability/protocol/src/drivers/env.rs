//! ENV05 温湿度传感器：每行三段，依次为温度、相对湿度、露点。
//!
//! 每段只取数字串：第一串为整数部分，第二串（如有）为小数部分，
//! 因此 `T+21.5C`、`21,5` 都解析为 21.5。

use chrono::NaiveDateTime;
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};

use super::Fixed;
use crate::error::{DriverError, ProtocolError};
use crate::line::LineProtocol;

pub const TYPE_CODE: &str = "6hLllL";

pub struct EnvProtocol {
    fixed: Fixed,
}

impl EnvProtocol {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [
            FieldSpec::new("t1", "T", "degC", 1000.0),
            FieldSpec::new("t2", "DewPoint", "degC", 1000.0),
            FieldSpec::new("var1", "RH", "per", 1000.0),
        ];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
        })
    }
}

impl LineProtocol for EnvProtocol {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [temperature, humidity, dew_point] = tokens.as_slice() else {
            return Err(DriverError::decode(format!(
                "expected 3 tokens, found {}",
                tokens.len()
            )));
        };
        let temperature = digits_value(temperature)?;
        let humidity = digits_value(humidity)?;
        let dew_point = digits_value(dew_point)?;
        Ok(vec![self.fixed.reading(
            received_at,
            vec![
                FieldValue::Number(temperature),
                FieldValue::Number(dew_point),
                FieldValue::Number(humidity),
            ],
        )])
    }
}

fn digits_value(token: &str) -> Result<f64, DriverError> {
    let runs: Vec<&str> = token
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .collect();
    let text = match runs.as_slice() {
        [] => return Err(DriverError::decode(format!("no digits in {token:?}"))),
        [whole] => whole.to_string(),
        [whole, fraction, ..] => format!("{whole}.{fraction}"),
    };
    text.parse::<f64>()
        .map_err(|_| DriverError::decode(format!("bad number {token:?}")))
}
