//! 主动 Arduino 板卡：每个 tick 依次发送命令，读取 H/M/D 应答行。
//!
//! 命令取自 `sensordesc`，以 `-` 分隔（如 `owT-swD`）。
//! 每条命令补足两个 `:` 并以 `\r\n` 结尾；应答读到 `MARTASEND` 或 20 行为止。

use async_trait::async_trait;
use chrono::NaiveDateTime;
use domain::{Reading, SensorDescriptor};
use tracing::warn;

use crate::catalog::SensorCatalog;
use crate::discovery::{BoardEvent, SubSensorDiscovery};
use crate::driver::{Exchange, FailureCounter, PolledDriver, RequestTransport};
use crate::error::DriverError;

pub const END_MARKER: &str = "MARTASEND";
pub const MAX_REPLY_LINES: usize = 20;
const DEFAULT_COMMANDS: [&str; 2] = ["owT", "swD"];
const COMMAND_TERMINATOR: &str = "\r\n";

/// 由描述字段得到请求命令。
pub fn commands_from_description(description: Option<&str>) -> Vec<Vec<u8>> {
    let listed: Vec<String> = match description.map(|d| d.replace('\n', "")) {
        Some(desc) if !desc.trim().is_empty() && desc.trim() != "arduino sensors" => desc
            .trim()
            .split('-')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        _ => DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect(),
    };
    listed
        .into_iter()
        .map(|mut command| {
            let colons = command.matches(':').count();
            for _ in colons..2 {
                command.push(':');
            }
            command.push_str(COMMAND_TERMINATOR);
            command.into_bytes()
        })
        .collect()
}

pub struct ActiveArduinoDriver {
    discovery: SubSensorDiscovery,
    commands: Vec<Vec<u8>>,
    failures: FailureCounter,
}

impl ActiveArduinoDriver {
    pub fn new(board: SensorDescriptor, catalog: SensorCatalog) -> Self {
        let commands = commands_from_description(board.description.as_deref());
        Self {
            discovery: SubSensorDiscovery::new(board, catalog),
            commands,
            failures: FailureCounter::default(),
        }
    }

    pub fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }

    pub fn discovery(&self) -> &SubSensorDiscovery {
        &self.discovery
    }
}

// 应答行形如 `D1: ...` 或 `D12: ...`
fn is_board_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() > 2 && (bytes[2] == b':' || bytes.get(3) == Some(&b':'))
}

#[async_trait]
impl PolledDriver for ActiveArduinoDriver {
    fn sensor(&self) -> &SensorDescriptor {
        self.discovery.board()
    }

    async fn poll(
        &mut self,
        transport: &mut dyn RequestTransport,
        now: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let mut readings = Vec::new();
        for command in &self.commands {
            let exchange = Exchange {
                request: command.clone(),
                end_marker: Some(END_MARKER.to_string()),
                max_lines: MAX_REPLY_LINES,
            };
            let lines = transport.exchange(&exchange).await?;
            for line in lines.iter().filter(|l| is_board_line(l)) {
                match self.discovery.handle_line(line, now) {
                    Ok(BoardEvent::Reading(reading)) => {
                        self.failures.success();
                        readings.push(reading);
                    }
                    Ok(_) => self.failures.success(),
                    Err(err) => {
                        magbus_telemetry::record_decode_failure();
                        warn!(
                            target: "magbus.driver",
                            board = %self.discovery.board().sensor_id,
                            line = %line,
                            error = %err,
                            "board_line_failed"
                        );
                        if self.failures.failure() {
                            return Err(DriverError::RestartRequested(format!(
                                "{} consecutive decode failures",
                                self.failures.count()
                            )));
                        }
                    }
                }
            }
        }
        Ok(readings)
    }
}
