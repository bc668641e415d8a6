//! TCP 传输（串口服务器等网络设备）。

use async_trait::async_trait;
use domain::SensorDescriptor;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{LINE_TIMEOUT, ReplyCollector};
use crate::driver::{Exchange, RequestTransport};
use crate::error::TransportError;

const READ_CHUNK: usize = 1024;

async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = timeout(LINE_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout(format!("connect {addr}")))?
        .map_err(|e| TransportError::Open {
            target: addr.to_string(),
            reason: e.to_string(),
        })?;
    info!(target: "magbus.driver", addr, "tcp_connected");
    Ok(stream)
}

/// 连接后启动读任务；对端关闭时通道随之关闭。
pub(super) async fn spawn_reader(
    sensor: &SensorDescriptor,
    addr: &str,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), TransportError> {
    let mut stream = connect(addr).await?;
    if let Some(init) = sensor.init.as_deref().filter(|s| !s.is_empty()) {
        stream.write_all(init.as_bytes()).await?;
    }
    let addr = addr.to_string();
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                read = stream.read(&mut buffer) => match read {
                    Ok(0) => {
                        info!(target: "magbus.driver", addr = %addr, "tcp_peer_closed");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "magbus.driver", addr = %addr, error = %e, "tcp_read_failed");
                        break;
                    }
                },
            }
        }
        debug!(target: "magbus.driver", addr = %addr, "tcp_reader_stopped");
    });
    Ok(())
}

/// TCP 请求/应答传输。
pub struct TcpRequestTransport {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpRequestTransport {
    pub async fn connect(addr: String) -> Result<Self, TransportError> {
        let stream = connect(&addr).await?;
        Ok(Self {
            addr,
            stream: Some(BufReader::new(stream)),
        })
    }
}

#[async_trait]
impl RequestTransport for TcpRequestTransport {
    async fn exchange(&mut self, exchange: &Exchange) -> Result<Vec<String>, TransportError> {
        if self.stream.is_none() {
            self.stream = Some(BufReader::new(connect(&self.addr).await?));
        }
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.get_mut().write_all(&exchange.request).await?;
        stream.get_mut().flush().await?;

        let mut collector = ReplyCollector::new(exchange);
        let mut line = String::new();
        while !collector.is_done() {
            line.clear();
            match timeout(LINE_TIMEOUT, stream.read_line(&mut line)).await {
                Ok(Ok(0)) => {
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                Ok(Ok(_)) => collector.push(line.as_bytes()),
                Ok(Err(e)) => return Err(e.into()),
                // 单行超时：返回已读到的部分
                Err(_) => break,
            }
        }
        Ok(collector.finish())
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        // 丢弃残留应答，重新建立连接
        self.stream = None;
        let stream = connect(&self.addr).await?;
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exchange_reads_until_marker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 7];
            socket.read_exact(&mut request).await.expect("request");
            socket
                .write_all(b"D1: 21.5\r\nMARTASEND\r\nignored\r\n")
                .await
                .expect("reply");
        });

        let mut transport = TcpRequestTransport::connect(addr).await.expect("connect");
        let exchange = Exchange {
            request: b"owT::\r\n".to_vec(),
            end_marker: Some("MARTASEND".to_string()),
            max_lines: 20,
        };
        let lines = transport.exchange(&exchange).await.expect("exchange");
        assert_eq!(lines, vec!["D1: 21.5".to_string(), "MARTASEND".to_string()]);
    }
}
