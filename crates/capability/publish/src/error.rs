//! 发布错误类型定义

use magbus_codec::CodecError;

/// 发布错误
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// 总线连接或发布失败
    #[error("bus error: {0}")]
    Bus(String),

    /// 记录无法编码（单条丢弃）
    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    /// 内部状态锁失败
    #[error("lock failed")]
    Lock,
}
