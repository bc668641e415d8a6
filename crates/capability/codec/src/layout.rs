//! 声明式字段布局
//!
//! 类型码字符串（如 `6hLffflll`）先展开为逐元素的 [`TypeCode`] 序列，
//! 再按键列表自左向右一次性绑定到字段上。编码和解码都只消费绑定结果，
//! 不再按位置切片字符串。
//!
//! ```text
//! 6hL            | f    | var1 | sectime
//! h h h h h h L  | L    | L    | h h h h h h L
//! ```

use domain::{
    CanonicalRecord, FieldValue, HeaderDescriptor, KeyKind, TIME_KEY, TimeParts, key_kind,
};

use crate::error::CodecError;

/// 时间块占用的元素个数（年、月、日、时、分、秒、微秒）。
pub const TIME_SLOTS: usize = 7;

/// 单个打包元素。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
    Str(usize),
}

impl TypeCode {
    fn from_symbol(symbol: char, count: usize) -> Option<Vec<TypeCode>> {
        let code = match symbol {
            'b' => TypeCode::I8,
            'B' => TypeCode::U8,
            'h' => TypeCode::I16,
            'H' => TypeCode::U16,
            'i' | 'l' => TypeCode::I32,
            'I' | 'L' => TypeCode::U32,
            'q' => TypeCode::I64,
            'Q' => TypeCode::U64,
            'f' => TypeCode::F32,
            'd' => TypeCode::F64,
            'c' => TypeCode::Char,
            // Ns 是一个 N 字节字符串，而不是 N 个元素
            's' => return Some(vec![TypeCode::Str(count)]),
            _ => return None,
        };
        Some(vec![code; count])
    }

    /// 小端、无填充下的字节数。
    pub fn size(&self) -> usize {
        match self {
            TypeCode::I8 | TypeCode::U8 | TypeCode::Char => 1,
            TypeCode::I16 | TypeCode::U16 => 2,
            TypeCode::I32 | TypeCode::U32 | TypeCode::F32 => 4,
            TypeCode::I64 | TypeCode::U64 | TypeCode::F64 => 8,
            TypeCode::Str(len) => *len,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeCode::F32 | TypeCode::F64)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TypeCode::Char | TypeCode::Str(_))
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float() && !self.is_text()
    }

    /// 整数元素可表示的范围。
    pub fn int_range(&self) -> Option<(i64, i64)> {
        Some(match self {
            TypeCode::I8 => (i8::MIN as i64, i8::MAX as i64),
            TypeCode::U8 => (0, u8::MAX as i64),
            TypeCode::I16 => (i16::MIN as i64, i16::MAX as i64),
            TypeCode::U16 => (0, u16::MAX as i64),
            TypeCode::I32 => (i32::MIN as i64, i32::MAX as i64),
            TypeCode::U32 => (0, u32::MAX as i64),
            TypeCode::I64 => (i64::MIN, i64::MAX),
            TypeCode::U64 => (0, i64::MAX),
            _ => return None,
        })
    }
}

/// 展开类型码字符串；接受并忽略前导 `<`。
pub fn parse_type_code(code: &str) -> Result<Vec<TypeCode>, CodecError> {
    let body = code.strip_prefix('<').unwrap_or(code);
    if body.is_empty() {
        return Err(CodecError::InvalidTypeCode("empty".to_string()));
    }
    let mut codes = Vec::new();
    let mut count: Option<usize> = None;
    for symbol in body.chars() {
        if let Some(digit) = symbol.to_digit(10) {
            let next = count.unwrap_or(0) * 10 + digit as usize;
            count = Some(next);
            continue;
        }
        let repeat = count.take().unwrap_or(1);
        if repeat == 0 {
            return Err(CodecError::InvalidTypeCode(format!("zero repeat in {code}")));
        }
        let expanded = TypeCode::from_symbol(symbol, repeat).ok_or_else(|| {
            CodecError::InvalidTypeCode(format!("unknown code '{symbol}' in {code}"))
        })?;
        codes.extend(expanded);
    }
    if count.is_some() {
        return Err(CodecError::InvalidTypeCode(format!("dangling count in {code}")));
    }
    Ok(codes)
}

/// 字段在布局中的形态。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer(TypeCode),
    Float(TypeCode),
    Text(TypeCode),
    /// 次级时间戳，占 7 个整数元素
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub key: String,
    pub kind: FieldKind,
    pub multiplier: f64,
}

/// 展平后的单个元素值。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Int(i64),
    Float(f64),
    Text(String),
}

/// 一个头部对应的完整记录布局。
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    fields: Vec<FieldLayout>,
    codes: Vec<TypeCode>,
    byte_length: usize,
}

impl RecordLayout {
    /// 将头部的类型码绑定到键列表。
    pub fn from_header(header: &HeaderDescriptor) -> Result<Self, CodecError> {
        let codes = parse_type_code(&header.type_code)?;
        let mut cursor = 0usize;

        take_integers(&codes, &mut cursor, TIME_KEY)?;

        let mut fields = Vec::with_capacity(header.keys.len());
        for (key, multiplier) in header.keys.iter().zip(&header.multipliers) {
            let kind = match key_kind(key) {
                Some(KeyKind::Timestamp) => {
                    take_integers(&codes, &mut cursor, key)?;
                    FieldKind::Timestamp
                }
                Some(KeyKind::Numeric) => {
                    let code = take_one(&codes, &mut cursor, key)?;
                    if code.is_text() {
                        return Err(CodecError::LayoutMismatch(format!(
                            "numeric key {key} bound to string code"
                        )));
                    }
                    if !multiplier.is_finite() || *multiplier == 0.0 {
                        return Err(CodecError::LayoutMismatch(format!(
                            "invalid multiplier {multiplier} for {key}"
                        )));
                    }
                    if code.is_float() {
                        FieldKind::Float(code)
                    } else {
                        FieldKind::Integer(code)
                    }
                }
                Some(KeyKind::Text) => {
                    let code = take_one(&codes, &mut cursor, key)?;
                    if !code.is_text() {
                        return Err(CodecError::LayoutMismatch(format!(
                            "string key {key} bound to numeric code"
                        )));
                    }
                    FieldKind::Text(code)
                }
                Some(KeyKind::Time) | None => {
                    return Err(CodecError::LayoutMismatch(format!("unexpected key {key}")));
                }
            };
            fields.push(FieldLayout {
                key: key.clone(),
                kind,
                multiplier: *multiplier,
            });
        }

        if cursor != codes.len() {
            return Err(CodecError::LayoutMismatch(format!(
                "{} trailing codes in {}",
                codes.len() - cursor,
                header.type_code
            )));
        }

        let byte_length = codes.iter().map(TypeCode::size).sum();
        Ok(Self {
            fields,
            codes,
            byte_length,
        })
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn codes(&self) -> &[TypeCode] {
        &self.codes
    }

    /// 打包后的记录字节数。
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// 记录 → 逐元素值（已乘以乘数）。
    pub(crate) fn flatten(&self, record: &CanonicalRecord) -> Result<Vec<Slot>, CodecError> {
        if record.values.len() != self.fields.len() {
            return Err(CodecError::FieldCount {
                expected: self.fields.len(),
                found: record.values.len(),
            });
        }
        let mut slots = Vec::with_capacity(self.codes.len());
        push_time(&mut slots, &record.time_parts());

        for (field, value) in self.fields.iter().zip(&record.values) {
            match (&field.kind, value) {
                (FieldKind::Integer(code), FieldValue::Number(number)) => {
                    let scaled = scale_to_int(&field.key, *code, *number, field.multiplier)?;
                    slots.push(Slot::Int(scaled));
                }
                (FieldKind::Float(_), FieldValue::Number(number)) => {
                    slots.push(Slot::Float(number * field.multiplier));
                }
                (FieldKind::Text(code), FieldValue::Text(text)) => {
                    check_text(&field.key, *code, text)?;
                    slots.push(Slot::Text(text.clone()));
                }
                (FieldKind::Timestamp, FieldValue::Time(ts)) => {
                    push_time(&mut slots, &TimeParts::from_datetime(ts));
                }
                _ => return Err(CodecError::field(&field.key, "value type does not match layout")),
            }
        }

        for ((slot, code), key) in slots.iter().zip(&self.codes).zip(self.slot_keys()) {
            if let (Slot::Int(value), Some((min, max))) = (slot, code.int_range()) {
                if *value < min || *value > max {
                    return Err(CodecError::field(key, format!("{value} out of range")));
                }
            }
        }
        Ok(slots)
    }

    /// 每个元素所属的键，时间块展开为 7 个。
    fn slot_keys(&self) -> impl Iterator<Item = &str> {
        let primary = std::iter::repeat_n(TIME_KEY, TIME_SLOTS);
        let fields = self.fields.iter().flat_map(|field| {
            let width = match field.kind {
                FieldKind::Timestamp => TIME_SLOTS,
                _ => 1,
            };
            std::iter::repeat_n(field.key.as_str(), width)
        });
        primary.chain(fields)
    }

    /// 逐元素值 → 记录（除以乘数）。
    pub(crate) fn assemble(&self, slots: Vec<Slot>) -> Result<CanonicalRecord, CodecError> {
        if slots.len() != self.codes.len() {
            return Err(CodecError::FieldCount {
                expected: self.codes.len(),
                found: slots.len(),
            });
        }
        let mut slots = slots.into_iter();
        let timestamp = take_time(&mut slots)?;

        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match field.kind {
                FieldKind::Timestamp => FieldValue::Time(take_time(&mut slots)?),
                FieldKind::Text(_) => match slots.next() {
                    Some(Slot::Text(text)) => FieldValue::Text(text),
                    _ => return Err(CodecError::field(&field.key, "expected string")),
                },
                FieldKind::Integer(_) | FieldKind::Float(_) => match slots.next() {
                    Some(Slot::Int(raw)) => FieldValue::Number(raw as f64 / field.multiplier),
                    Some(Slot::Float(raw)) => FieldValue::Number(raw / field.multiplier),
                    _ => return Err(CodecError::field(&field.key, "expected number")),
                },
            };
            values.push(value);
        }
        Ok(CanonicalRecord::new(timestamp, values))
    }
}

fn take_one(codes: &[TypeCode], cursor: &mut usize, key: &str) -> Result<TypeCode, CodecError> {
    let code = codes
        .get(*cursor)
        .copied()
        .ok_or_else(|| CodecError::LayoutMismatch(format!("no code left for {key}")))?;
    *cursor += 1;
    Ok(code)
}

fn take_integers(codes: &[TypeCode], cursor: &mut usize, key: &str) -> Result<(), CodecError> {
    for _ in 0..TIME_SLOTS {
        if !take_one(codes, cursor, key)?.is_integer() {
            return Err(CodecError::LayoutMismatch(format!(
                "time block of {key} must be integer codes"
            )));
        }
    }
    Ok(())
}

// 定长文本必须是 ASCII 且放得下；NUL 会在解包时截断。
fn check_text(key: &str, code: TypeCode, text: &str) -> Result<(), CodecError> {
    if text.contains([',', ';']) {
        return Err(CodecError::field(key, "separator in string value"));
    }
    if !text.is_ascii() || text.contains('\0') {
        return Err(CodecError::field(key, "string value must be ascii without nul"));
    }
    if text.len() > code.size() {
        return Err(CodecError::field(
            key,
            format!("{} bytes exceed {}-byte field", text.len(), code.size()),
        ));
    }
    Ok(())
}

fn push_time(slots: &mut Vec<Slot>, parts: &TimeParts) {
    slots.extend(parts.to_array().into_iter().map(Slot::Int));
}

fn take_time(slots: &mut impl Iterator<Item = Slot>) -> Result<chrono::NaiveDateTime, CodecError> {
    let mut fields = [0i64; TIME_SLOTS];
    for field in fields.iter_mut() {
        *field = match slots.next() {
            Some(Slot::Int(value)) => value,
            other => return Err(CodecError::InvalidTime(format!("{other:?}"))),
        };
    }
    TimeParts::from_fields(&fields)
        .and_then(|parts| parts.to_datetime())
        .ok_or_else(|| CodecError::InvalidTime(format!("{fields:?}")))
}

/// 乘以乘数后截断取整。
///
/// 浮点误差（如 12.345 × 1000 = 12344.999…）先吸附到最近整数再截断。
fn scale_to_int(key: &str, code: TypeCode, value: f64, multiplier: f64) -> Result<i64, CodecError> {
    let scaled = value * multiplier;
    if !scaled.is_finite() {
        return Err(CodecError::field(key, format!("{value} is not finite")));
    }
    let nearest = scaled.round();
    let truncated = if (scaled - nearest).abs() <= 1e-9 * scaled.abs().max(1.0) {
        nearest
    } else {
        scaled.trunc()
    };
    let (min, max) = code.int_range().unwrap_or((i64::MIN, i64::MAX));
    if truncated < min as f64 || truncated > max as f64 {
        return Err(CodecError::field(key, format!("{truncated} out of range for {code:?}")));
    }
    Ok(truncated as i64)
}
