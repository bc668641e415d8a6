//! 文本数据行
//!
//! 一条记录：前 7 个字段是拆分的 UTC 时间，其后按键顺序排列预乘后的值，逗号分隔。
//! 一条数据消息可以包含多条记录，以分号分隔。

use domain::CanonicalRecord;

use crate::error::CodecError;
use crate::layout::{RecordLayout, Slot, TypeCode};

pub const FIELD_SEPARATOR: char = ',';
pub const RECORD_SEPARATOR: char = ';';

/// 编码为一条文本记录。
pub fn encode_line(record: &CanonicalRecord, layout: &RecordLayout) -> Result<String, CodecError> {
    let slots = layout.flatten(record)?;
    let mut out = String::with_capacity(slots.len() * 8);
    for (index, (slot, code)) in slots.iter().zip(layout.codes()).enumerate() {
        if index > 0 {
            out.push(FIELD_SEPARATOR);
        }
        match slot {
            Slot::Int(value) => out.push_str(&value.to_string()),
            Slot::Float(value) if *code == TypeCode::F32 => {
                out.push_str(&(*value as f32).to_string())
            }
            Slot::Float(value) => out.push_str(&value.to_string()),
            Slot::Text(value) => out.push_str(value),
        }
    }
    Ok(out)
}

/// 解码一条文本记录。
pub fn decode_line(line: &str, layout: &RecordLayout) -> Result<CanonicalRecord, CodecError> {
    let tokens: Vec<&str> = line.trim().split(FIELD_SEPARATOR).map(str::trim).collect();
    if tokens.len() != layout.codes().len() {
        return Err(CodecError::FieldCount {
            expected: layout.codes().len(),
            found: tokens.len(),
        });
    }
    let mut slots = Vec::with_capacity(tokens.len());
    for (position, (token, code)) in tokens.iter().zip(layout.codes()).enumerate() {
        let slot = if code.is_text() {
            Slot::Text(token.to_string())
        } else if code.is_float() {
            Slot::Float(parse_float(token, position)?)
        } else {
            Slot::Int(parse_int(token, position)?)
        };
        slots.push(slot);
    }
    layout.assemble(slots)
}

/// 以记录分隔符拼接多条已编码记录。
pub fn join_records<S: AsRef<str>>(records: &[S]) -> String {
    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(record.as_ref());
    }
    out
}

/// 拆分数据消息，跳过空记录。
pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

// 整数字段也接受 "2050.0" 这类写法，按截断处理。
fn parse_int(token: &str, position: usize) -> Result<i64, CodecError> {
    if let Ok(value) = token.parse::<i64>() {
        return Ok(value);
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc() as i64),
        _ => Err(CodecError::field(
            &format!("#{position}"),
            format!("'{token}' is not an integer"),
        )),
    }
}

fn parse_float(token: &str, position: usize) -> Result<f64, CodecError> {
    token.parse::<f64>().map_err(|_| {
        CodecError::field(&format!("#{position}"), format!("'{token}' is not a number"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_skips_empty_records() {
        let records: Vec<&str> = split_records("a,b; c,d ;;\n").collect();
        assert_eq!(records, vec!["a,b", "c,d"]);
        assert_eq!(join_records(&["a,b", "c,d"]), "a,b;c,d");
        assert_eq!(join_records::<&str>(&[]), "");
    }

    #[test]
    fn integer_tokens_accept_float_notation() {
        assert_eq!(parse_int("2050", 0).expect("int"), 2050);
        assert_eq!(parse_int("2050.9", 0).expect("int"), 2050);
        assert!(parse_int("abc", 3).is_err());
        assert!(parse_float("1e3", 0).is_ok());
    }
}
