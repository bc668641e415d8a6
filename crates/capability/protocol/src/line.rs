//! 行协议公共部分：按分隔符切行，再交给具体解析器。

use chrono::NaiveDateTime;
use domain::{Reading, SensorDescriptor};
use tracing::warn;

use crate::driver::{EventDrivenDriver, FailureCounter};
use crate::error::DriverError;

/// 单行最大字节数，超过后整体丢弃。
pub const MAX_LINE_BYTES: usize = 4096;

/// 字节流切行器。
#[derive(Debug, Clone)]
pub struct LineSplitter {
    delimiter: u8,
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            buffer: Vec::new(),
        }
    }

    /// 追加字节，返回完整的行（去掉不可打印字符与首尾空白，跳过空行）。
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == self.delimiter) {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line: String = raw[..end]
                .iter()
                .filter(|b| b.is_ascii_graphic() || **b == b' ')
                .map(|b| *b as char)
                .collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(
                target: "magbus.driver",
                bytes = self.buffer.len(),
                "line_overflow_discarded"
            );
            self.buffer.clear();
        }
        lines
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// 单行解析器。
pub trait LineProtocol: Send {
    fn sensor(&self) -> &SensorDescriptor;

    fn on_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError>;
}

/// 把行解析器包装为事件驱动驱动。
pub struct LineDriver<P> {
    protocol: P,
    splitter: LineSplitter,
    failures: FailureCounter,
}

impl<P: LineProtocol> LineDriver<P> {
    pub fn new(protocol: P, delimiter: u8) -> Self {
        Self {
            protocol,
            splitter: LineSplitter::new(delimiter),
            failures: FailureCounter::default(),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }
}

impl<P: LineProtocol> EventDrivenDriver for LineDriver<P> {
    fn sensor(&self) -> &SensorDescriptor {
        self.protocol.sensor()
    }

    fn on_bytes(
        &mut self,
        bytes: &[u8],
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let mut readings = Vec::new();
        for line in self.splitter.feed(bytes) {
            match self.protocol.on_line(&line, received_at) {
                Ok(parsed) => {
                    self.failures.success();
                    magbus_telemetry::record_frame_decoded();
                    readings.extend(parsed);
                }
                Err(DriverError::Decode(reason)) => {
                    magbus_telemetry::record_decode_failure();
                    warn!(
                        target: "magbus.driver",
                        sensor_id = %self.protocol.sensor().sensor_id,
                        line = %line,
                        reason = %reason,
                        "line_decode_failed"
                    );
                    if self.failures.failure() {
                        return Err(DriverError::RestartRequested(format!(
                            "{} consecutive decode failures",
                            self.failures.count()
                        )));
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Ok(readings)
    }

    fn reset(&mut self) {
        self.splitter.clear();
        self.failures.success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut splitter = LineSplitter::new(b'\n');
        assert!(splitter.feed(b"12:00:00 4").is_empty());
        let lines = splitter.feed(b"8123.4 00\r\n\r\nnext");
        assert_eq!(lines, vec!["12:00:00 48123.4 00".to_string()]);
        assert_eq!(splitter.pending(), b"next");
    }

    #[test]
    fn drops_non_printable_bytes() {
        let mut splitter = LineSplitter::new(b'\n');
        let lines = splitter.feed(b"\x00\x1b48123.4\xff\n");
        assert_eq!(lines, vec!["48123.4".to_string()]);
    }

    #[test]
    fn overlong_garbage_is_discarded() {
        let mut splitter = LineSplitter::new(b'\n');
        splitter.feed(&vec![b'a'; MAX_LINE_BYTES + 1]);
        assert!(splitter.pending().is_empty());
    }
}
