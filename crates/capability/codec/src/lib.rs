//! # 自描述编解码模块
//!
//! 所有驱动共享的 "schema 头部 + 打包载荷" 编解码：
//! - **头部文法**：`# MagPyBin <sensorId> [keys] [elements] [units] [multipliers] <typeCode> <byteLength>`
//! - **文本数据行**：总线上的 data 载荷，逗号分隔字段、分号分隔记录
//! - **二进制记录**：归档文件中的小端定长记录
//!
//! ## 数据流
//!
//! ```text
//! HeaderDescriptor ──► RecordLayout（声明式字段布局）
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!     header_line     encode/decode_line   pack/unpack
//! ```

mod binary;
mod error;
mod layout;
mod line;
mod schema;

pub use binary::{pack_record, unpack_record};
pub use error::CodecError;
pub use layout::{FieldKind, FieldLayout, RecordLayout, TIME_SLOTS, TypeCode, parse_type_code};
pub use line::{
    FIELD_SEPARATOR, RECORD_SEPARATOR, decode_line, encode_line, join_records, split_records,
};
pub use schema::{FORMAT_TAG, Schema};
