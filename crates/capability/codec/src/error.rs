//! 编解码错误类型定义

use domain::KeyError;

/// 编解码错误
///
/// 单条记录的错误只丢弃该记录；SchemaMismatch 属于完整性故障。
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// 头部行无法解析
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// 头部内嵌的 sensorId 与主题不一致
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    /// 类型码非法
    #[error("invalid type code: {0}")]
    InvalidTypeCode(String),

    /// 类型码与键列表无法对应
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    /// 声明的字节长度与类型码不符
    #[error("length mismatch: declared {declared}, computed {computed}")]
    LengthMismatch { declared: usize, computed: usize },

    /// 字段值非法（非数值、越界、包含分隔符）
    #[error("invalid field {key}: {reason}")]
    InvalidField { key: String, reason: String },

    /// 字段数量不符
    #[error("field count mismatch: expected {expected}, found {found}")]
    FieldCount { expected: usize, found: usize },

    /// 时间戳非法
    #[error("invalid timestamp: {0}")]
    InvalidTime(String),

    /// 键列表违反规范键空间
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// 二进制读写错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn field(key: &str, reason: impl Into<String>) -> Self {
        CodecError::InvalidField {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
