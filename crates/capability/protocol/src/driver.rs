//! 驱动能力接口
//!
//! - [`EventDrivenDriver`]：字节到达时被调用，纯同步、不阻塞
//! - [`PolledDriver`]：按固定间隔发起一次请求/应答交换

use async_trait::async_trait;
use chrono::NaiveDateTime;
use domain::{Reading, SensorDescriptor};

use crate::error::{DriverError, TransportError};

/// 连续解码失败上限，超过后请求重启。
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// 事件驱动驱动：帧/行协议。
pub trait EventDrivenDriver: Send {
    fn sensor(&self) -> &SensorDescriptor;

    /// 处理新到达的字节，返回解出的读数。
    ///
    /// `received_at` 为主机接收时间。
    fn on_bytes(
        &mut self,
        bytes: &[u8],
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError>;

    /// 传输重建后清理内部缓冲。
    fn reset(&mut self) {}
}

/// 轮询驱动：请求/应答协议。
#[async_trait]
pub trait PolledDriver: Send {
    fn sensor(&self) -> &SensorDescriptor;

    /// 是否需要打开设备传输（主机生成数据的驱动不需要）。
    fn uses_transport(&self) -> bool {
        true
    }

    /// 执行一次轮询。调用方负责整体超时。
    async fn poll(
        &mut self,
        transport: &mut dyn RequestTransport,
        now: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError>;
}

/// 一次请求/应答交换。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub request: Vec<u8>,
    /// 读到该行即结束
    pub end_marker: Option<String>,
    /// 最多读取的行数
    pub max_lines: usize,
}

/// 请求/应答传输。
#[async_trait]
pub trait RequestTransport: Send {
    /// 写出请求并按行读取应答。
    async fn exchange(&mut self, exchange: &Exchange) -> Result<Vec<String>, TransportError>;

    /// 丢弃未读完的部分应答。
    async fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// 不做任何 IO 的传输，用于无需设备的轮询驱动。
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl RequestTransport for NullTransport {
    async fn exchange(&mut self, _exchange: &Exchange) -> Result<Vec<String>, TransportError> {
        Err(TransportError::Closed)
    }
}

/// 连续失败计数。
#[derive(Debug, Clone, Copy)]
pub struct FailureCounter {
    count: u32,
    limit: u32,
}

impl FailureCounter {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    pub fn success(&mut self) {
        self.count = 0;
    }

    /// 记录一次失败；超过上限时返回 true。
    pub fn failure(&mut self) -> bool {
        self.count += 1;
        self.count > self.limit
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for FailureCounter {
    fn default() -> Self {
        Self::new(MAX_CONSECUTIVE_FAILURES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_counter_trips_after_limit() {
        let mut counter = FailureCounter::new(2);
        assert!(!counter.failure());
        assert!(!counter.failure());
        assert!(counter.failure());
        counter.success();
        assert_eq!(counter.count(), 0);
        assert!(!counter.failure());
    }
}
