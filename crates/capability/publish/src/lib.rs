//! # 发布能力模块
//!
//! 把驱动输出的读数发布到消息总线：
//!
//! ```text
//! Reading 通道 ──► Publisher ──► BusClient
//!                    │             ├── MqttBus（rumqttc）
//!                    │             └── RecordingBus（进程内）
//!                    ▼
//!   <station>/<sensorId>/schema | dict | data
//! ```

mod bus;
mod error;
mod publisher;

pub use bus::{BusClient, MqttBus, MqttBusConfig, PublishedMessage, RecordingBus, qos_from_u8};
pub use error::PublishError;
pub use publisher::{Publisher, SCHEMA_EVERY, dict_payload};
