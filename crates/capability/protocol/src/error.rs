//! 协议错误类型定义

use domain::KeyError;
use magbus_codec::CodecError;

/// 协议层配置与装配错误（启动期）
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 未注册的协议名
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// 模式与驱动能力不匹配
    #[error("protocol {protocol} does not support {mode} mode")]
    ModeMismatch { protocol: String, mode: String },

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 头部声明非法
    #[error("header error: {0}")]
    Header(#[from] KeyError),

    /// 编解码错误
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// 传感器目录错误
    #[error("catalog error: {0}")]
    Catalog(String),

    /// 传输错误
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 传输错误：设备打开/读写失败
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 打开设备或建立连接失败
    #[error("open failed for {target}: {reason}")]
    Open { target: String, reason: String },

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 超时
    #[error("timeout: {0}")]
    Timeout(String),

    /// 对端关闭或通道关闭
    #[error("transport closed")]
    Closed,
}

/// 驱动运行期错误
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// 单条数据无法解析（计入连续失败次数）
    #[error("decode error: {0}")]
    Decode(String),

    /// 编解码错误
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// 传输错误（跳过本次 tick）
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// 数据源（数据库、owserver）查询失败（跳过本次 tick）
    #[error("source error: {0}")]
    Source(String),

    /// 请求监督者重启整个组件
    #[error("restart requested: {0}")]
    RestartRequested(String),
}

impl DriverError {
    pub fn decode(reason: impl Into<String>) -> Self {
        DriverError::Decode(reason.into())
    }

    pub fn source_failed(reason: impl Into<String>) -> Self {
        DriverError::Source(reason.into())
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        DriverError::Source(err.to_string())
    }
}
