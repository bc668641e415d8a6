//! 收集错误类型定义

use magbus_codec::CodecError;

/// 收集错误
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 主题不符合 `<station>/<sensorId>/<channel>`
    #[error("invalid topic: {0}")]
    Topic(String),

    /// 编解码错误
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// 完整性故障（schema 内嵌 sensorId 与主题不符）
    #[error("integrity violation for {sensor_id}: {reason}")]
    Integrity { sensor_id: String, reason: String },

    /// 总线订阅或连接失败
    #[error("source error: {0}")]
    Source(String),

    /// 配置值非法
    #[error("invalid setting: {0}")]
    Setting(String),
}

/// Sink 写入错误
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("lock failed")]
    Lock,
}
