//! 测试驱动：每次轮询由主机生成一个 50±9 附近的随机值。

use async_trait::async_trait;
use chrono::NaiveDateTime;
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use rand_core::{OsRng, RngCore};

use super::Fixed;
use crate::driver::{PolledDriver, RequestTransport};
use crate::error::{DriverError, ProtocolError};

pub const TYPE_CODE: &str = "6hLl";

pub struct TestSourceDriver {
    fixed: Fixed,
}

impl TestSourceDriver {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let fields = [FieldSpec::new("x", "RN", "random", 1000.0)];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
        })
    }
}

fn random_value() -> f64 {
    let offset = (OsRng.next_u32() % 19) as f64 - 9.0;
    let divisor = (OsRng.next_u32() % 9 + 1) as f64;
    50.0 + offset + 1.0 / divisor
}

#[async_trait]
impl PolledDriver for TestSourceDriver {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn uses_transport(&self) -> bool {
        false
    }

    async fn poll(
        &mut self,
        _transport: &mut dyn RequestTransport,
        now: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        Ok(vec![self
            .fixed
            .reading(now, vec![FieldValue::Number(random_value())])])
    }
}
