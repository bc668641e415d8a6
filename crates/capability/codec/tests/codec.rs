use chrono::NaiveDate;
use domain::{CanonicalRecord, FieldSpec, FieldValue, HeaderDescriptor};
use magbus_codec::{CodecError, Schema, split_records};

fn ts(h: u32, m: u32, s: u32, us: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_micro_opt(h, m, s, us))
        .expect("timestamp")
}

#[test]
fn end_to_end_schema_and_data_decode() {
    let schema = Schema::parse(
        "# MagPyBin TEST_1_0001 [time,x,y,z,t1,t2] [time,X,Y,Z,T1,T2] [none,nT,nT,nT,degC,degC] [1,1000,1000,1000,100,100] 6hLlllll 36",
        Some("TEST_1_0001"),
    )
    .expect("schema");
    assert_eq!(schema.header().keys, vec!["x", "y", "z", "t1", "t2"]);

    let record = schema
        .decode_line("2024,1,1,0,0,0,0,12345,23456,34567,2050,1950")
        .expect("record");
    assert_eq!(record.timestamp, ts(0, 0, 0, 0));
    let values: Vec<f64> = record.values.iter().filter_map(FieldValue::as_number).collect();
    let expected = [12.345, 23.456, 34.567, 20.50, 19.50];
    for (value, expected) in values.iter().zip(expected) {
        assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
    }
}

fn mixed_schema() -> Schema {
    let header = HeaderDescriptor::new(
        "MIX_1_0001",
        &[
            FieldSpec::new("x", "X", "nT", 0.001),
            FieldSpec::new("f", "F", "nT", 1000.0),
            FieldSpec::new("t1", "T", "degC", 100.0),
            FieldSpec::new("var1", "err", "none", 1.0),
            FieldSpec::new("var2", "raw", "none", 10.0),
            FieldSpec::new("str1", "state", "none", 1.0),
            FieldSpec::new("sectime", "gps", "none", 1.0),
        ],
        "6hLfLlhd8s6hL",
    )
    .expect("header");
    Schema::new(header).expect("schema")
}

fn mixed_record() -> CanonicalRecord {
    CanonicalRecord::new(
        ts(12, 30, 15, 250_000),
        vec![
            FieldValue::Number(21456.5),
            FieldValue::Number(48123.456),
            FieldValue::Number(-3.21),
            FieldValue::Number(7.0),
            FieldValue::Number(-1.5),
            FieldValue::Text("OK".to_string()),
            FieldValue::Time(ts(12, 30, 14, 900_000)),
        ],
    )
}

fn assert_close(decoded: &CanonicalRecord, original: &CanonicalRecord, schema: &Schema) {
    assert_eq!(decoded.timestamp, original.timestamp);
    for ((got, want), multiplier) in decoded
        .values
        .iter()
        .zip(&original.values)
        .zip(&schema.header().multipliers)
    {
        match (got, want) {
            (FieldValue::Number(got), FieldValue::Number(want)) => {
                let tolerance = (1.0 / multiplier).max(1e-3 * want.abs().max(1.0) * 1e-3);
                assert!((got - want).abs() < tolerance, "{got} vs {want}");
            }
            _ => assert_eq!(got, want),
        }
    }
}

#[test]
fn text_line_round_trip_within_multiplier() {
    let schema = mixed_schema();
    let record = mixed_record();
    let line = schema.encode_line(&record).expect("encode");
    assert_eq!(line.split(',').count(), schema.layout().codes().len());
    let decoded = schema.decode_line(&line).expect("decode");
    assert_close(&decoded, &record, &schema);
}

#[test]
fn binary_round_trip_matches_declared_length() {
    let schema = mixed_schema();
    let record = mixed_record();
    let packed = schema.pack(&record).expect("pack");
    assert_eq!(packed.len(), schema.layout().byte_length());
    let decoded = schema.unpack(&packed).expect("unpack");
    assert_close(&decoded, &record, &schema);
    assert!(matches!(
        schema.unpack(&packed[1..]),
        Err(CodecError::LengthMismatch { .. })
    ));
}

#[test]
fn bad_records_fail_individually() {
    let schema = Schema::parse(
        "ENV05_2_0001 [t1,t2,var1] [T,DewPoint,RH] [degC,degC,per] [1000,1000,1000] 6hLllL 28",
        None,
    )
    .expect("schema");
    let payload = "2024,1,1,0,0,0,0,21500,10200,45000;2024,1,1,0,0,1,0,abc,1,2;2024,1,1,0,0,2,0,21600,10300,46000";
    let results: Vec<_> = split_records(payload).map(|r| schema.decode_line(r)).collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(CodecError::InvalidField { .. })));
    assert!(results[2].is_ok());
}

#[test]
fn negative_into_unsigned_is_an_encoding_error() {
    let schema = Schema::parse(
        "CS_1_0001 [f] [f] [nT] [1000] 6hLL 20",
        None,
    )
    .expect("schema");
    let record = CanonicalRecord::new(ts(0, 0, 0, 0), vec![FieldValue::Number(-1.0)]);
    assert!(matches!(
        schema.encode_line(&record),
        Err(CodecError::InvalidField { .. })
    ));
}

fn single_field_schema(key: &str, code: char, width: &str) -> Schema {
    let header = HeaderDescriptor::new(
        "TYPE_1_0001",
        &[FieldSpec::new(key, "E", "none", 1.0)],
        &format!("6hL{width}{code}"),
    )
    .expect("header");
    Schema::new(header).expect("schema")
}

#[test]
fn every_numeric_type_code_round_trips() {
    let cases: [(char, f64); 12] = [
        ('b', -100.0),
        ('B', 200.0),
        ('h', -30_000.0),
        ('H', 60_000.0),
        ('i', -2_000_000_000.0),
        ('I', 4_000_000_000.0),
        ('l', -123_456.0),
        ('L', 3_000_000_000.0),
        ('q', -1_000_000_000_000.0),
        ('Q', 1_000_000_000_000.0),
        ('f', 1.5),
        ('d', 12_345.678),
    ];
    for (code, value) in cases {
        let schema = single_field_schema("x", code, "");
        let record = CanonicalRecord::new(ts(1, 2, 3, 4), vec![FieldValue::Number(value)]);

        let line = schema.encode_line(&record).expect("encode");
        let from_line = schema.decode_line(&line).expect("decode");
        assert_eq!(from_line.values[0].as_number(), Some(value), "text {code}");

        let packed = schema.pack(&record).expect("pack");
        assert_eq!(packed.len(), schema.layout().byte_length(), "length {code}");
        let from_bytes = schema.unpack(&packed).expect("unpack");
        assert_eq!(from_bytes, record, "binary {code}");
    }
}

#[test]
fn text_type_codes_round_trip_identically() {
    for (code, width, text) in [('c', "", "A"), ('s', "4", "OK"), ('s', "4", "FULL")] {
        let schema = single_field_schema("str1", code, width);
        let record = CanonicalRecord::new(ts(0, 0, 0, 0), vec![FieldValue::Text(text.into())]);
        let line = schema.encode_line(&record).expect("encode");
        assert_eq!(schema.decode_line(&line).expect("decode"), record);
        let packed = schema.pack(&record).expect("pack");
        assert_eq!(schema.unpack(&packed).expect("unpack"), record);
    }
}

#[test]
fn text_that_does_not_fit_is_rejected() {
    let char_schema = single_field_schema("str1", 'c', "");
    let str_schema = single_field_schema("str1", 's', "4");
    let rejected = [
        (&char_schema, "OK"),
        (&str_schema, "TOOLONG"),
        (&str_schema, "\u{e9}t\u{e9}"),
    ];
    for (schema, text) in rejected {
        let record = CanonicalRecord::new(ts(0, 0, 0, 0), vec![FieldValue::Text(text.into())]);
        assert!(matches!(
            schema.pack(&record),
            Err(CodecError::InvalidField { .. })
        ));
        assert!(matches!(
            schema.encode_line(&record),
            Err(CodecError::InvalidField { .. })
        ));
    }
}

#[test]
fn out_of_range_secondary_time_names_its_key() {
    let header = HeaderDescriptor::new(
        "GPS_1_0001",
        &[FieldSpec::new("sectime", "gps", "none", 1.0)],
        "6hL6BL",
    )
    .expect("header");
    let schema = Schema::new(header).expect("schema");
    let record = CanonicalRecord::new(ts(0, 0, 0, 0), vec![FieldValue::Time(ts(0, 0, 0, 0))]);
    match schema.pack(&record) {
        Err(CodecError::InvalidField { key, .. }) => assert_eq!(key, "sectime"),
        other => panic!("expected sectime range error, got {other:?}"),
    }
}
