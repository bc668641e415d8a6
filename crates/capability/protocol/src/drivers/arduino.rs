//! 被动 Arduino 板卡：板卡自行推送 H/M/D 行，子传感器动态发现。

use chrono::NaiveDateTime;
use domain::{Reading, SensorDescriptor};

use crate::catalog::SensorCatalog;
use crate::discovery::{BoardEvent, SubSensorDiscovery};
use crate::error::DriverError;
use crate::line::LineProtocol;

pub struct ArduinoProtocol {
    discovery: SubSensorDiscovery,
}

impl ArduinoProtocol {
    pub fn new(board: SensorDescriptor, catalog: SensorCatalog) -> Self {
        Self {
            discovery: SubSensorDiscovery::new(board, catalog),
        }
    }

    pub fn discovery(&self) -> &SubSensorDiscovery {
        &self.discovery
    }
}

impl LineProtocol for ArduinoProtocol {
    fn sensor(&self) -> &SensorDescriptor {
        self.discovery.board()
    }

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        Ok(match self.discovery.handle_line(line, received_at)? {
            BoardEvent::Reading(reading) => vec![reading],
            BoardEvent::Discovery(_) | BoardEvent::Ignored => Vec::new(),
        })
    }
}
