//! 头部文法与 [`Schema`]
//!
//! ```text
//! # MagPyBin GSM90_6107631_0001 [f,var1,sectime] [f,errorcode,internaltime] [nT,none,none] [1000,1,1] 6hLLL6hL 40
//! ```
//!
//! 总线上的 schema 消息与归档文件首行共用同一文法。

use domain::{CanonicalRecord, HeaderDescriptor, TIME_KEY};

use crate::binary::{pack_record, unpack_record};
use crate::error::CodecError;
use crate::layout::RecordLayout;
use crate::line::{decode_line, encode_line};

/// 头部行的格式标签。
pub const FORMAT_TAG: &str = "MagPyBin";

/// 头部与其绑定后的布局。
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    header: HeaderDescriptor,
    layout: RecordLayout,
}

impl Schema {
    pub fn new(header: HeaderDescriptor) -> Result<Self, CodecError> {
        let layout = RecordLayout::from_header(&header)?;
        Ok(Self { header, layout })
    }

    /// 解析头部行；给定 `expected` 时校验内嵌 sensorId。
    pub fn parse(line: &str, expected: Option<&str>) -> Result<Self, CodecError> {
        let parsed = parse_header_line(line)?;
        if let Some(expected) = expected {
            if parsed.sensor_id != expected {
                return Err(CodecError::SchemaMismatch {
                    expected: expected.to_string(),
                    found: parsed.sensor_id,
                });
            }
        }
        let header = HeaderDescriptor::from_parts(
            parsed.sensor_id,
            parsed.keys,
            parsed.elements,
            parsed.units,
            parsed.multipliers,
            parsed.type_code,
        )?;
        let schema = Self::new(header)?;
        if schema.layout.byte_length() != parsed.byte_length {
            return Err(CodecError::LengthMismatch {
                declared: parsed.byte_length,
                computed: schema.layout.byte_length(),
            });
        }
        Ok(schema)
    }

    pub fn header(&self) -> &HeaderDescriptor {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut HeaderDescriptor {
        &mut self.header
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn sensor_id(&self) -> &str {
        &self.header.sensor_id
    }

    /// 头部行（不含换行）。
    pub fn header_line(&self) -> String {
        let header = &self.header;
        format!(
            "# {FORMAT_TAG} {} [{}] [{}] [{}] [{}] {} {}",
            header.sensor_id,
            list(&header.keys),
            list(&header.elements),
            list(&header.units),
            header
                .multipliers
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(","),
            header.type_code,
            self.layout.byte_length()
        )
    }

    pub fn encode_line(&self, record: &CanonicalRecord) -> Result<String, CodecError> {
        encode_line(record, &self.layout)
    }

    pub fn decode_line(&self, line: &str) -> Result<CanonicalRecord, CodecError> {
        decode_line(line, &self.layout)
    }

    pub fn pack(&self, record: &CanonicalRecord) -> Result<Vec<u8>, CodecError> {
        pack_record(record, &self.layout)
    }

    pub fn unpack(&self, bytes: &[u8]) -> Result<CanonicalRecord, CodecError> {
        unpack_record(bytes, &self.layout)
    }
}

// 列表项中的空白会破坏按空格切分的文法。
fn list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.split_whitespace().collect::<Vec<_>>().join("_"))
        .collect::<Vec<_>>()
        .join(",")
}

struct ParsedHeader {
    sensor_id: String,
    keys: Vec<String>,
    elements: Vec<String>,
    units: Vec<String>,
    multipliers: Vec<f64>,
    type_code: String,
    byte_length: usize,
}

fn parse_header_line(line: &str) -> Result<ParsedHeader, CodecError> {
    // 旧固件的单位写作 "deg C"，含空格
    let normalized = line.trim().replace(", ", ",").replace("deg C", "deg");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.len() < 7 {
        return Err(CodecError::MalformedHeader(format!(
            "expected at least 7 tokens, found {}",
            tokens.len()
        )));
    }
    // 从尾部取固定位置，前缀（如 "# MagPyBin"）不参与解析
    let tail = &tokens[tokens.len() - 7..];
    let byte_length = tail[6]
        .parse::<usize>()
        .map_err(|_| CodecError::MalformedHeader(format!("invalid byte length '{}'", tail[6])))?;
    let mut keys = bracket_list(tail[1])?;
    let mut elements = bracket_list(tail[2])?;
    let mut units = bracket_list(tail[3])?;
    let mut multipliers = bracket_list(tail[4])?
        .iter()
        .map(|m| {
            m.parse::<f64>()
                .map_err(|_| CodecError::MalformedHeader(format!("invalid multiplier '{m}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if keys.first().map(String::as_str) == Some(TIME_KEY) {
        let declared = keys.len();
        keys.remove(0);
        if elements.len() == declared {
            elements.remove(0);
        }
        if units.len() == declared {
            units.remove(0);
        }
        if multipliers.len() == declared {
            multipliers.remove(0);
        }
    }

    Ok(ParsedHeader {
        sensor_id: tail[0].to_string(),
        keys,
        elements,
        units,
        multipliers,
        type_code: tail[5].to_string(),
        byte_length,
    })
}

fn bracket_list(token: &str) -> Result<Vec<String>, CodecError> {
    let inner = token
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| CodecError::MalformedHeader(format!("expected [list], found '{token}'")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner.split(',').map(|item| item.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GSM90: &str = "# MagPyBin GSM90_6107631_0001 [f,var1,sectime] [f,errorcode,internaltime] [nT,none,none] [1000,1,1] 6hLLL6hL 40";

    #[test]
    fn parses_and_reformats_header() {
        let schema = Schema::parse(GSM90, Some("GSM90_6107631_0001")).expect("schema");
        assert_eq!(schema.header().keys, vec!["f", "var1", "sectime"]);
        assert_eq!(schema.header().multipliers, vec![1000.0, 1.0, 1.0]);
        assert_eq!(schema.layout().byte_length(), 40);
        assert_eq!(schema.header_line(), GSM90);
    }

    #[test]
    fn embedded_sensor_id_must_match() {
        let err = Schema::parse(GSM90, Some("GSM90_1_0001")).expect_err("mismatch");
        assert!(matches!(err, CodecError::SchemaMismatch { .. }));
    }

    #[test]
    fn declared_length_must_match_layout() {
        let line = GSM90.replace(" 40", " 48");
        assert!(matches!(
            Schema::parse(&line, None),
            Err(CodecError::LengthMismatch { declared: 48, computed: 40 })
        ));
    }

    #[test]
    fn tolerates_spaces_after_commas() {
        let line = "ENV05_2_0001 [t1, t2] [T, DewPoint] [degC, degC] [1000, 1000] 6hLll 24";
        let schema = Schema::parse(line, None).expect("schema");
        assert_eq!(schema.header().elements, vec!["T", "DewPoint"]);
    }

    #[test]
    fn rejects_short_or_unbracketed_headers() {
        assert!(matches!(
            Schema::parse("# MagPyBin X_1_1 [x]", None),
            Err(CodecError::MalformedHeader(_))
        ));
        assert!(matches!(
            Schema::parse("X_1_1 x [X] [nT] [1] 6hLl 20", None),
            Err(CodecError::MalformedHeader(_))
        ));
    }
}
