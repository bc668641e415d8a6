//! 追踪初始化与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub corruption_discards: u64,
    pub driver_restarts: u64,
    pub records_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub unknown_schema_drops: u64,
    pub schema_mismatches: u64,
    pub decode_failures: u64,
    pub records_dispatched: u64,
    pub sink_failures: u64,
    pub sink_queue_drops: u64,
}

/// 采集侧与汇集侧共用的计数器。
pub struct TelemetryMetrics {
    frames_decoded: AtomicU64,
    corruption_discards: AtomicU64,
    driver_restarts: AtomicU64,
    records_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    unknown_schema_drops: AtomicU64,
    schema_mismatches: AtomicU64,
    decode_failures: AtomicU64,
    records_dispatched: AtomicU64,
    sink_failures: AtomicU64,
    sink_queue_drops: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            corruption_discards: AtomicU64::new(0),
            driver_restarts: AtomicU64::new(0),
            records_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            unknown_schema_drops: AtomicU64::new(0),
            schema_mismatches: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            records_dispatched: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            sink_queue_drops: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            corruption_discards: self.corruption_discards.load(Ordering::Relaxed),
            driver_restarts: self.driver_restarts.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            unknown_schema_drops: self.unknown_schema_drops.load(Ordering::Relaxed),
            schema_mismatches: self.schema_mismatches.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            sink_queue_drops: self.sink_queue_drops.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录成功解出的帧/行数。
pub fn record_frame_decoded() {
    metrics().frames_decoded.fetch_add(1, Ordering::Relaxed);
}

/// 记录同步器丢弃次数。
pub fn record_corruption_discard() {
    metrics().corruption_discards.fetch_add(1, Ordering::Relaxed);
}

/// 记录驱动重启次数。
pub fn record_driver_restart() {
    metrics().driver_restarts.fetch_add(1, Ordering::Relaxed);
}

/// 记录发布成功的记录数。
pub fn record_published(records: u64) {
    metrics()
        .records_published
        .fetch_add(records, Ordering::Relaxed);
}

/// 记录发布失败次数。
pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录汇集侧收到的总线消息数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录无 schema 丢弃的数据消息数。
pub fn record_unknown_schema_drop() {
    metrics()
        .unknown_schema_drops
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 sensorId 不一致次数。
pub fn record_schema_mismatch() {
    metrics().schema_mismatches.fetch_add(1, Ordering::Relaxed);
}

/// 记录单条记录解码失败次数（驱动侧与汇集侧）。
pub fn record_decode_failure() {
    metrics().decode_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录交给 sink 的记录数。
pub fn record_dispatched() {
    metrics()
        .records_dispatched
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 sink 写入失败次数。
pub fn record_sink_failure() {
    metrics().sink_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录 sink 队列满丢弃次数。
pub fn record_sink_queue_drop() {
    metrics().sink_queue_drops.fetch_add(1, Ordering::Relaxed);
}
