//! # 收集能力模块
//!
//! 订阅总线，按传感器维护 schema 状态，解码 data 并分发到 Sink：
//!
//! ```text
//! MQTT (<station>/#) ──► Collector ──► Registry（每个 sensorId 一个会话）
//!                            │
//!                            ▼
//!                       SinkFanout ──► log / file / memory（各自的有界队列）
//! ```

mod collector;
mod error;
mod registry;
pub mod sink;
mod source;

pub use collector::{Collector, Handled};
pub use error::{CollectorError, SinkError};
pub use registry::{MismatchPolicy, Registry, SensorSession, SessionState};
pub use sink::{
    ArchiveFileSink, Dispatch, InMemorySink, LogSink, SINK_QUEUE_CAPACITY, Sink, SinkFanout,
    StoredRecord,
};
pub use source::{MqttCollectorSource, MqttSourceConfig};
