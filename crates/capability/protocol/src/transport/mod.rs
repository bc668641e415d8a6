//! 设备传输
//!
//! - 串口：`<serial_prefix><port>`，阻塞读线程把字节块送入有界通道
//! - 网络：`tcp://host:port`，tokio TCP 流
//!
//! 事件驱动驱动消费字节通道；轮询驱动使用 [`RequestTransport`]。

mod serial;
mod tcp;

use std::time::Duration;

use domain::SensorDescriptor;
use tokio::sync::mpsc;

use crate::driver::{Exchange, RequestTransport};
use crate::error::TransportError;

pub use serial::{SerialRequestTransport, open_serial};
pub use tcp::TcpRequestTransport;

/// 字节通道容量（传输 → 驱动）。
pub const BYTE_CHANNEL_CAPACITY: usize = 64;

/// 单行应答的读超时。
pub const LINE_TIMEOUT: Duration = Duration::from_secs(2);

const TCP_SCHEME: &str = "tcp://";

/// 传感器端口解析后的目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial(String),
    Tcp(String),
}

impl Endpoint {
    pub fn resolve(sensor: &SensorDescriptor, serial_prefix: &str) -> Self {
        match sensor.port.strip_prefix(TCP_SCHEME) {
            Some(addr) => Endpoint::Tcp(addr.to_string()),
            None if sensor.port.starts_with('/') => Endpoint::Serial(sensor.port.clone()),
            None => Endpoint::Serial(format!("{serial_prefix}{}", sensor.port)),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Serial(path) => write!(f, "{path}"),
            Endpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
        }
    }
}

/// 打开字节流；设备断开时通道关闭。
pub async fn open_byte_stream(
    sensor: &SensorDescriptor,
    serial_prefix: &str,
) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
    let (tx, rx) = mpsc::channel(BYTE_CHANNEL_CAPACITY);
    match Endpoint::resolve(sensor, serial_prefix) {
        Endpoint::Serial(path) => {
            let port = open_serial(sensor, &path, serial::READ_TIMEOUT)?;
            serial::spawn_reader(port, path, tx)?;
        }
        Endpoint::Tcp(addr) => tcp::spawn_reader(sensor, &addr, tx).await?,
    }
    Ok(rx)
}

/// 打开请求/应答传输。
pub async fn open_request_transport(
    sensor: &SensorDescriptor,
    serial_prefix: &str,
) -> Result<Box<dyn RequestTransport>, TransportError> {
    Ok(match Endpoint::resolve(sensor, serial_prefix) {
        Endpoint::Serial(path) => Box::new(SerialRequestTransport::open(sensor.clone(), path)?),
        Endpoint::Tcp(addr) => Box::new(TcpRequestTransport::connect(addr).await?),
    })
}

/// 按行收集应答，直到结束标记或行数上限。
#[derive(Debug)]
pub(crate) struct ReplyCollector<'a> {
    exchange: &'a Exchange,
    lines: Vec<String>,
    done: bool,
}

impl<'a> ReplyCollector<'a> {
    pub fn new(exchange: &'a Exchange) -> Self {
        Self {
            exchange,
            lines: Vec::new(),
            done: exchange.max_lines == 0,
        }
    }

    pub fn push(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw).trim().to_string();
        if let Some(marker) = &self.exchange.end_marker {
            if line.contains(marker.as_str()) {
                self.done = true;
            }
        }
        if !line.is_empty() {
            self.lines.push(line);
        }
        if self.lines.len() >= self.exchange.max_lines {
            self.done = true;
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(self) -> Vec<String> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_from_port() {
        let mut sensor = SensorDescriptor::new("GSM90_1_0001", "USB0", "GSM90");
        assert_eq!(
            Endpoint::resolve(&sensor, "/dev/tty"),
            Endpoint::Serial("/dev/ttyUSB0".to_string())
        );
        sensor.port = "tcp://10.0.0.5:4001".to_string();
        let endpoint = Endpoint::resolve(&sensor, "/dev/tty");
        assert_eq!(endpoint, Endpoint::Tcp("10.0.0.5:4001".to_string()));
        assert_eq!(endpoint.to_string(), "tcp://10.0.0.5:4001");
        sensor.port = "/dev/serial0".to_string();
        assert_eq!(
            Endpoint::resolve(&sensor, "/dev/tty"),
            Endpoint::Serial("/dev/serial0".to_string())
        );
    }

    #[test]
    fn collector_stops_at_marker_or_limit() {
        let exchange = Exchange {
            request: Vec::new(),
            end_marker: Some("MARTASEND".to_string()),
            max_lines: 3,
        };
        let mut collector = ReplyCollector::new(&exchange);
        collector.push(b"D1: 1\r");
        assert!(!collector.is_done());
        collector.push(b"MARTASEND\r");
        assert!(collector.is_done());
        assert_eq!(collector.finish().len(), 2);

        let mut collector = ReplyCollector::new(&exchange);
        for _ in 0..3 {
            collector.push(b"x");
        }
        assert!(collector.is_done());
    }
}
