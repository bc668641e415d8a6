use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// 记录中单个字段的取值。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Time(NaiveDateTime),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Time(value) => Some(*value),
            _ => None,
        }
    }
}

/// 规范记录：UTC 时间戳 + 与头部键列表对齐的值。
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub timestamp: NaiveDateTime,
    pub values: Vec<FieldValue>,
}

impl CanonicalRecord {
    pub fn new(timestamp: NaiveDateTime, values: Vec<FieldValue>) -> Self {
        Self { timestamp, values }
    }

    /// 拆分后的时间戳（Y,M,D,h,m,s,µs）。
    pub fn time_parts(&self) -> TimeParts {
        TimeParts::from_datetime(&self.timestamp)
    }
}

/// 拆分时间戳：年、月、日、时、分、秒、微秒。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub micros: u32,
}

impl TimeParts {
    pub fn from_datetime(ts: &NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour(),
            minute: ts.minute(),
            second: ts.second(),
            micros: ts.nanosecond() / 1_000,
        }
    }

    /// 按线上顺序返回 7 个整数。
    pub fn to_array(&self) -> [i64; 7] {
        [
            self.year as i64,
            self.month as i64,
            self.day as i64,
            self.hour as i64,
            self.minute as i64,
            self.second as i64,
            self.micros as i64,
        ]
    }

    /// 从 7 个整数还原；任何越界字段返回 None。
    pub fn from_fields(fields: &[i64]) -> Option<Self> {
        let [year, month, day, hour, minute, second, micros] = <[i64; 7]>::try_from(fields).ok()?;
        Some(Self {
            year: i32::try_from(year).ok()?,
            month: u32::try_from(month).ok()?,
            day: u32::try_from(day).ok()?,
            hour: u32::try_from(hour).ok()?,
            minute: u32::try_from(minute).ok()?,
            second: u32::try_from(second).ok()?,
            micros: u32::try_from(micros).ok()?,
        })
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_micro_opt(
            self.hour,
            self.minute,
            self.second,
            self.micros,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_parts_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_micro_opt(23, 59, 58, 123_456))
            .expect("timestamp");
        let parts = TimeParts::from_datetime(&ts);
        assert_eq!(parts.to_array(), [2024, 2, 29, 23, 59, 58, 123_456]);
        let back = TimeParts::from_fields(&parts.to_array()).and_then(|p| p.to_datetime());
        assert_eq!(back, Some(ts));
    }

    #[test]
    fn invalid_fields_are_rejected() {
        assert!(TimeParts::from_fields(&[2024, 13, 1, 0, 0, 0, 0])
            .and_then(|p| p.to_datetime())
            .is_none());
        assert!(TimeParts::from_fields(&[2024, 1, 1]).is_none());
        assert!(TimeParts::from_fields(&[2024, -1, 1, 0, 0, 0, 0]).is_none());
    }
}
