use std::sync::Arc;

use chrono::NaiveDate;
use domain::{
    CanonicalRecord, FieldSpec, FieldValue, HeaderDescriptor, Reading, SensorDescriptor,
};
use magbus_codec::{Schema, split_records};
use magbus_publish::{Publisher, RecordingBus, dict_payload};
use tokio::sync::mpsc;

fn reading(sensor: &Arc<SensorDescriptor>, header: &Arc<HeaderDescriptor>, n: u32) -> Reading {
    let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(12, 0, n))
        .expect("timestamp");
    Reading {
        sensor: sensor.clone(),
        header: header.clone(),
        record: CanonicalRecord::new(ts, vec![FieldValue::Number(48000.0 + f64::from(n))]),
        extras: vec![("DataNTPTimeDelay".to_string(), "0.25".to_string())],
    }
}

fn gsm(stack: usize) -> (Arc<SensorDescriptor>, Arc<HeaderDescriptor>) {
    let mut sensor = SensorDescriptor::new("GSM90_1_0001", "S0", "GSM90");
    sensor.stack = stack;
    let header = HeaderDescriptor::new(
        "GSM90_1_0001",
        &[FieldSpec::new("f", "F", "nT", 1000.0)],
        "6hLL",
    )
    .expect("header");
    (Arc::new(sensor), Arc::new(header))
}

#[tokio::test]
async fn batch_of_three_is_one_data_message() {
    let bus = RecordingBus::new();
    let mut publisher = Publisher::new("wic", Arc::new(bus.clone()));
    let (sensor, header) = gsm(3);

    publisher.publish(reading(&sensor, &header, 1)).await.expect("first");
    publisher.publish(reading(&sensor, &header, 2)).await.expect("second");
    assert!(bus.messages().is_empty());
    publisher.publish(reading(&sensor, &header, 3)).await.expect("third");

    let messages = bus.messages();
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec!["wic/GSM90_1_0001/schema", "wic/GSM90_1_0001/dict", "wic/GSM90_1_0001/data"]
    );
    let schema = Schema::parse(&messages[0].payload, Some("GSM90_1_0001")).expect("schema");
    let records: Vec<_> = split_records(&messages[2].payload)
        .map(|line| schema.decode_line(line).expect("record"))
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].values[0], FieldValue::Number(48003.0));

    // 下一块同样重发 schema
    for n in 4..7 {
        publisher.publish(reading(&sensor, &header, n)).await.expect("block");
    }
    let schemas = bus
        .messages()
        .iter()
        .filter(|m| m.topic.ends_with("/schema"))
        .count();
    assert_eq!(schemas, 2);
}

#[tokio::test]
async fn unbatched_schema_is_repeated_every_ten_records() {
    let bus = RecordingBus::new();
    let mut publisher = Publisher::new("wic", Arc::new(bus.clone()));
    let (sensor, header) = gsm(1);
    for n in 0..11 {
        publisher.publish(reading(&sensor, &header, n)).await.expect("publish");
    }
    let messages = bus.messages();
    let count = |suffix: &str| messages.iter().filter(|m| m.topic.ends_with(suffix)).count();
    assert_eq!(count("/data"), 11);
    assert_eq!(count("/schema"), 2);
    assert_eq!(count("/dict"), 2);
    assert!(messages[0].topic.ends_with("/schema"));
}

#[tokio::test]
async fn shutdown_flushes_partial_stacks() {
    let bus = RecordingBus::new();
    let publisher = Publisher::new("wic", Arc::new(bus.clone()));
    let (sensor, header) = gsm(5);
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(publisher.run(rx));
    tx.send(reading(&sensor, &header, 1)).await.expect("send");
    tx.send(reading(&sensor, &header, 2)).await.expect("send");
    drop(tx);
    task.await.expect("publisher");

    let data: Vec<_> = bus
        .messages()
        .into_iter()
        .filter(|m| m.topic.ends_with("/data"))
        .collect();
    assert_eq!(data.len(), 1);
    assert_eq!(split_records(&data[0].payload).count(), 2);
}

#[tokio::test]
async fn bus_failures_are_counted_not_fatal() {
    let before = magbus_telemetry::metrics().snapshot().publish_failures;
    let publisher = Publisher::new("wic", Arc::new(RecordingBus::failing()));
    let (sensor, header) = gsm(1);
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(publisher.run(rx));
    tx.send(reading(&sensor, &header, 1)).await.expect("send");
    tx.send(reading(&sensor, &header, 2)).await.expect("send");
    drop(tx);
    task.await.expect("publisher survives");
    assert!(magbus_telemetry::metrics().snapshot().publish_failures >= before + 2);
}

#[test]
fn dict_uses_placeholder_and_escapes_commas() {
    let mut sensor = SensorDescriptor::new("ENV05_2_0001", "USB1", "Env");
    sensor.description = Some("roof, north side".to_string());
    sensor.ptime = Some("NTP".to_string());
    let extras = vec![("DataNTPTimeDelay".to_string(), "0.5".to_string())];
    assert_eq!(
        dict_payload("wic", &sensor, &extras),
        "SensorID:ENV05_2_0001,StationID:wic,DataPier:-,SensorModule:Env,SensorGroup:-,\
         SensorDescription:roof_ north side,DataTimeProtocol:NTP,DataNTPTimeDelay:0.5"
    );
}
