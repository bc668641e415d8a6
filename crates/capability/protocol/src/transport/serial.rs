//! 串口传输（serialport，阻塞 IO 放在独立线程或 spawn_blocking 中）。

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use domain::SensorDescriptor;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{LINE_TIMEOUT, ReplyCollector};
use crate::driver::{Exchange, RequestTransport};
use crate::error::TransportError;

/// 读线程的单次读超时；超时后检查通道是否已关闭。
pub(super) const READ_TIMEOUT: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 512;
/// 写出命令后等待设备开始应答。
const REPLY_DELAY: Duration = Duration::from_millis(100);

fn open_error(path: &str, reason: impl ToString) -> TransportError {
    TransportError::Open {
        target: path.to_string(),
        reason: reason.to_string(),
    }
}

/// 按传感器描述的线路参数打开串口，并写出初始化序列。
pub fn open_serial(
    sensor: &SensorDescriptor,
    path: &str,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, TransportError> {
    let data_bits = match sensor.bytesize {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => return Err(open_error(path, format!("unsupported bytesize {other}"))),
    };
    let parity = match sensor.parity.to_ascii_uppercase().as_str() {
        "N" => Parity::None,
        "E" => Parity::Even,
        "O" => Parity::Odd,
        other => return Err(open_error(path, format!("unsupported parity {other}"))),
    };
    let stop_bits = match sensor.stopbits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => return Err(open_error(path, format!("unsupported stopbits {other}"))),
    };

    let mut port = serialport::new(path, sensor.baudrate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| open_error(path, e))?;

    info!(
        target: "magbus.driver",
        sensor_id = %sensor.sensor_id,
        path,
        baudrate = sensor.baudrate,
        "serial_port_opened"
    );

    if let Some(init) = sensor.init.as_deref().filter(|s| !s.is_empty()) {
        port.write_all(init.as_bytes())?;
        port.flush()?;
        debug!(target: "magbus.driver", sensor_id = %sensor.sensor_id, "serial_init_sent");
    }
    Ok(port)
}

/// 启动阻塞读线程；接收端关闭或设备出错时线程退出。
pub(super) fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    path: String,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), TransportError> {
    std::thread::Builder::new()
        .name(format!("serial-{path}"))
        .spawn(move || {
            let mut buffer = [0u8; READ_CHUNK];
            while !tx.is_closed() {
                match port.read(&mut buffer) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!(
                            target: "magbus.driver",
                            path = %path,
                            error = %e,
                            "serial_read_failed"
                        );
                        break;
                    }
                }
            }
            debug!(target: "magbus.driver", path = %path, "serial_reader_stopped");
        })?;
    Ok(())
}

/// 串口请求/应答传输。
pub struct SerialRequestTransport {
    sensor: SensorDescriptor,
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialRequestTransport {
    pub fn open(sensor: SensorDescriptor, path: String) -> Result<Self, TransportError> {
        let port = open_serial(&sensor, &path, LINE_TIMEOUT)?;
        Ok(Self {
            sensor,
            path,
            port: Some(port),
        })
    }
}

fn exchange_blocking(
    port: &mut Box<dyn SerialPort>,
    exchange: &Exchange,
) -> Result<Vec<String>, TransportError> {
    port.clear(ClearBuffer::Input)
        .map_err(|e| TransportError::Io(e.into()))?;
    port.write_all(&exchange.request)?;
    port.flush()?;
    std::thread::sleep(REPLY_DELAY);

    let mut collector = ReplyCollector::new(exchange);
    let mut current = Vec::new();
    let mut byte = [0u8; 1];
    while !collector.is_done() {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => {
                collector.push(&current);
                current.clear();
            }
            Ok(_) => current.push(byte[0]),
            // 单行超时：返回已读到的部分
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }
    if !current.is_empty() && !collector.is_done() {
        collector.push(&current);
    }
    Ok(collector.finish())
}

#[async_trait]
impl RequestTransport for SerialRequestTransport {
    async fn exchange(&mut self, exchange: &Exchange) -> Result<Vec<String>, TransportError> {
        // 超时被取消时端口随阻塞任务丢失，下次交换前重新打开
        let mut port = match self.port.take() {
            Some(port) => port,
            None => open_serial(&self.sensor, &self.path, LINE_TIMEOUT)?,
        };
        let exchange = exchange.clone();
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = exchange_blocking(&mut port, &exchange);
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        self.port = Some(port);
        result
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            self.port = Some(open_serial(&self.sensor, &self.path, LINE_TIMEOUT)?);
        }
        Ok(())
    }
}
