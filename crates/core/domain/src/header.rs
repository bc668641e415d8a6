//! 头部描述（HeaderDescriptor，俗称 schema）。

use std::collections::BTreeMap;

use crate::keys::{KeyError, validate_keys};

/// 字典中表示"无值，保留原值"的占位符。
pub const DICT_PLACEHOLDER: &str = "-";

/// 单个字段的声明。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub element: String,
    pub unit: String,
    pub multiplier: f64,
}

impl FieldSpec {
    pub fn new(key: &str, element: &str, unit: &str, multiplier: f64) -> Self {
        Self {
            key: key.to_string(),
            element: element.to_string(),
            unit: unit.to_string(),
            multiplier,
        }
    }
}

/// 传感器头部：键、元素名、单位、乘数与类型码，外加字典属性。
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderDescriptor {
    pub sensor_id: String,
    pub keys: Vec<String>,
    pub elements: Vec<String>,
    pub units: Vec<String>,
    pub multipliers: Vec<f64>,
    /// 紧凑类型码，如 6hLlll
    pub type_code: String,
    pub attributes: BTreeMap<String, String>,
}

impl HeaderDescriptor {
    /// 由字段声明构造，键顺序必须符合规范键空间。
    pub fn new(
        sensor_id: impl Into<String>,
        fields: &[FieldSpec],
        type_code: impl Into<String>,
    ) -> Result<Self, KeyError> {
        Self::from_parts(
            sensor_id.into(),
            fields.iter().map(|f| f.key.clone()).collect(),
            fields.iter().map(|f| f.element.clone()).collect(),
            fields.iter().map(|f| f.unit.clone()).collect(),
            fields.iter().map(|f| f.multiplier).collect(),
            type_code.into(),
        )
    }

    /// 由并列数组构造并校验对齐关系。
    pub fn from_parts(
        sensor_id: String,
        keys: Vec<String>,
        elements: Vec<String>,
        units: Vec<String>,
        multipliers: Vec<f64>,
        type_code: String,
    ) -> Result<Self, KeyError> {
        validate_keys(&keys)?;
        for (what, len) in [
            ("elements", elements.len()),
            ("units", units.len()),
            ("multipliers", multipliers.len()),
        ] {
            if len != keys.len() {
                return Err(KeyError::Misaligned {
                    keys: keys.len(),
                    other: len,
                    what,
                });
            }
        }
        Ok(Self {
            sensor_id,
            keys,
            elements,
            units,
            multipliers,
            type_code,
            attributes: BTreeMap::new(),
        })
    }

    pub fn key_position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|candidate| candidate == key)
    }

    /// 合并一个字典属性；占位符保留原值。返回是否发生了改动。
    pub fn merge_attribute(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim_end_matches(['\r', '\n']);
        if value == DICT_PLACEHOLDER || key.is_empty() {
            return false;
        }
        let previous = self.attributes.insert(key.to_string(), value.to_string());
        previous.as_deref() != Some(value)
    }

    /// 布局是否相同（忽略字典属性）。
    pub fn same_layout(&self, other: &HeaderDescriptor) -> bool {
        self.sensor_id == other.sensor_id
            && self.keys == other.keys
            && self.elements == other.elements
            && self.units == other.units
            && self.multipliers == other.multipliers
            && self.type_code == other.type_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderDescriptor {
        HeaderDescriptor::new(
            "ENV05_2_0001",
            &[
                FieldSpec::new("t1", "T", "degC", 1000.0),
                FieldSpec::new("t2", "DewPoint", "degC", 1000.0),
            ],
            "6hLll",
        )
        .expect("header")
    }

    #[test]
    fn placeholder_keeps_existing_attribute() {
        let mut header = header();
        assert!(header.merge_attribute("t1", "18.0"));
        assert!(!header.merge_attribute("t1", "-"));
        assert!(!header.merge_attribute("t1", "-\r\n"));
        assert!(header.merge_attribute("t2", "21.3"));
        assert_eq!(header.attributes.get("t1").map(String::as_str), Some("18.0"));
        assert_eq!(header.attributes.get("t2").map(String::as_str), Some("21.3"));
    }

    #[test]
    fn misaligned_arrays_are_rejected() {
        let result = HeaderDescriptor::from_parts(
            "X_1_1".to_string(),
            vec!["x".to_string(), "y".to_string()],
            vec!["X".to_string(), "Y".to_string()],
            vec!["nT".to_string(), "nT".to_string()],
            vec![1000.0],
            "6hLll".to_string(),
        );
        assert!(matches!(result, Err(KeyError::Misaligned { what: "multipliers", .. })));
    }
}
