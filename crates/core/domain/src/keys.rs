//! 规范键空间（Canonical Key Space）。
//!
//! 所有传感器的字段都投射到这组固定、有序的通用槽位上。
//! 头部键列表必须是它的子集，并保持相对顺序。

use thiserror::Error;

/// 时间键：始终占据记录的前 7 个槽位，不出现在头部键列表中。
pub const TIME_KEY: &str = "time";

/// 固定、有序的规范键空间。
pub const CANONICAL_KEYS: [&str; 24] = [
    "time", "x", "y", "z", "f", "t1", "t2", "var1", "var2", "var3", "var4", "var5", "dx", "dy",
    "dz", "df", "str1", "str2", "str3", "str4", "flag", "comment", "typ", "sectime",
];

/// 键的取值类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// 主时间戳
    Time,
    /// 定点数值
    Numeric,
    /// 字符串
    Text,
    /// 次级时间戳（占 7 个整数槽位）
    Timestamp,
}

/// 键列表校验错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unknown key: {0}")]
    Unknown(String),
    #[error("key out of canonical order: {0}")]
    OutOfOrder(String),
    #[error("field arrays misaligned: {keys} keys, {other} {what}")]
    Misaligned {
        keys: usize,
        other: usize,
        what: &'static str,
    },
}

/// 返回键在规范键空间中的位置。
pub fn key_index(key: &str) -> Option<usize> {
    CANONICAL_KEYS.iter().position(|candidate| *candidate == key)
}

/// 返回键的取值类别；未知键返回 None。
pub fn key_kind(key: &str) -> Option<KeyKind> {
    let index = key_index(key)?;
    Some(match key {
        "time" => KeyKind::Time,
        "sectime" => KeyKind::Timestamp,
        _ if index <= 15 => KeyKind::Numeric,
        _ => KeyKind::Text,
    })
}

/// 校验头部键列表：全部属于键空间、不含 time、严格保持规范顺序（不重复）。
pub fn validate_keys<S: AsRef<str>>(keys: &[S]) -> Result<(), KeyError> {
    let mut last: Option<usize> = None;
    for key in keys {
        let key = key.as_ref();
        let index = match key_index(key) {
            Some(index) if key != TIME_KEY => index,
            _ => return Err(KeyError::Unknown(key.to_string())),
        };
        if let Some(previous) = last {
            if index <= previous {
                return Err(KeyError::OutOfOrder(key.to_string()));
            }
        }
        last = Some(index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_key_space() {
        assert_eq!(key_kind("time"), Some(KeyKind::Time));
        assert_eq!(key_kind("x"), Some(KeyKind::Numeric));
        assert_eq!(key_kind("df"), Some(KeyKind::Numeric));
        assert_eq!(key_kind("str2"), Some(KeyKind::Text));
        assert_eq!(key_kind("sectime"), Some(KeyKind::Timestamp));
        assert_eq!(key_kind("bogus"), None);
    }

    #[test]
    fn validate_rejects_reordered_keys() {
        assert!(validate_keys(&["x", "y", "z", "t1"]).is_ok());
        assert_eq!(
            validate_keys(&["f", "df", "var1"]),
            Err(KeyError::OutOfOrder("var1".to_string()))
        );
        assert_eq!(
            validate_keys(&["x", "x"]),
            Err(KeyError::OutOfOrder("x".to_string()))
        );
        assert_eq!(
            validate_keys(&["time", "x"]),
            Err(KeyError::Unknown("time".to_string()))
        );
    }
}
