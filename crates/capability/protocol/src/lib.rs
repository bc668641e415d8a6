//! # 采集协议能力模块
//!
//! 把传感器字节流解码为规范记录（[`domain::Reading`]），支持：
//! - **事件驱动**：二进制定长帧（帧同步器）、ASCII 行
//! - **轮询**：命令请求 / 应答
//! - **动态发现**：多路复用板卡上的子传感器自动登记
//!
//! ## 架构设计
//!
//! ```text
//! 传感器清单 (SensorDescriptor)
//!       │
//!       ▼
//! DriverFactory ──► DriverHandle
//!       │               ├── EventDrivenDriver ◄── 字节通道 ◄── 串口 / TCP
//!       │               └── PolledDriver ◄──► RequestTransport
//!       ▼
//! supervise_sensor（每个传感器一个任务，重启退避）
//!       │
//!       ▼
//! Reading 通道 → Publisher
//! ```
//!
//! ## 传感器清单
//! ```json
//! [{ "sensorid": "LEMI036_1_0002", "port": "USB0", "baudrate": 57600, "protocol": "Lemi" }]
//! ```

mod catalog;
mod discovery;
mod driver;
pub mod drivers;
mod error;
mod factory;
mod line;
mod runtime;
mod skew;
mod sync;
pub mod transport;

pub use catalog::SensorCatalog;
pub use discovery::{
    BoardEvent, DiscoveryOutcome, SUB_SENSOR_MULTIPLIER, SubSensorDiscovery,
};
pub use driver::{
    EventDrivenDriver, Exchange, FailureCounter, MAX_CONSECUTIVE_FAILURES, NullTransport,
    PolledDriver, RequestTransport,
};
pub use error::{DriverError, ProtocolError, TransportError};
pub use factory::{DriverContext, DriverFactory, DriverHandle, DriverKind};
pub use line::{LineDriver, LineProtocol, LineSplitter, MAX_LINE_BYTES};
pub use runtime::{
    READING_CHANNEL_CAPACITY, SessionEnd, run_event_driven, run_polled, supervise_sensor,
    wait_shutdown,
};
pub use skew::{SKEW_MIN_SAMPLES, SKEW_THRESHOLD_SECS, SKEW_WINDOW, SkewObservation, SkewTracker};
pub use sync::{CorruptionEvent, DEFAULT_CORRUPTION_THRESHOLD, FrameSynchronizer, SyncOutput};
