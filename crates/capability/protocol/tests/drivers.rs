use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};
use domain::{FieldValue, SensorDescriptor, SensorMode};
use magbus_protocol::drivers::active_arduino::ActiveArduinoDriver;
use magbus_protocol::drivers::lemi::{FRAME_LEN, SAMPLES_PER_FRAME};
use magbus_protocol::{
    BoardEvent, DiscoveryOutcome, DriverContext, DriverFactory, DriverHandle, Exchange,
    ProtocolError, RequestTransport, SensorCatalog, SessionEnd, SubSensorDiscovery,
    TransportError, run_polled,
};
use tokio::sync::{mpsc, watch};

fn host_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_milli_opt(12, 0, 3, 0))
        .expect("host time")
}

fn lemi_frame() -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(b"L036");
    frame[5..11].copy_from_slice(&[0x24, 0x05, 0x01, 0x12, 0x00, 0x01]);
    LittleEndian::write_i16(&mut frame[11..13], 2150);
    LittleEndian::write_i16(&mut frame[13..15], 3025);
    for n in 0..SAMPLES_PER_FRAME {
        let base = 28 + 12 * n;
        LittleEndian::write_f32(&mut frame[base..base + 4], 20.0 + n as f32 / 1000.0);
        LittleEndian::write_f32(&mut frame[base + 4..base + 8], 1.5);
        LittleEndian::write_f32(&mut frame[base + 8..base + 12], -44.0);
    }
    frame[150] = 120;
    frame[151] = b'A';
    frame
}

#[test]
fn factory_rejects_unknown_protocol_and_wrong_mode() {
    let factory = DriverFactory::builtin();
    let ctx = DriverContext::default();

    let unknown = factory.build(SensorDescriptor::new("DB_1_0001", "USB0", "MySQL"), &ctx);
    assert!(matches!(unknown, Err(ProtocolError::UnknownProtocol(name)) if name == "MySQL"));

    let mut active_lemi = SensorDescriptor::new("LEMI036_1_0002", "USB0", "Lemi");
    active_lemi.mode = SensorMode::Active;
    assert!(matches!(
        factory.build(active_lemi, &ctx),
        Err(ProtocolError::ModeMismatch { .. })
    ));

    let passive_test = SensorDescriptor::new("TEST_1234_0001", "", "test");
    assert!(matches!(
        factory.build(passive_test, &ctx),
        Err(ProtocolError::ModeMismatch { .. })
    ));
}

#[test]
fn lemi_frame_yields_ten_records_at_ten_hertz() {
    let factory = DriverFactory::builtin();
    let handle = factory
        .build(
            SensorDescriptor::new("LEMI036_1_0002", "USB0", "Lemi"),
            &DriverContext::default(),
        )
        .expect("lemi");
    let DriverHandle::EventDriven(mut driver) = handle else {
        panic!("lemi is event driven");
    };

    let mut stream = b"xx".to_vec();
    stream.extend(lemi_frame());
    let readings = driver.on_bytes(&stream, host_time()).expect("frame");

    assert_eq!(readings.len(), 10);
    let first = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_milli_opt(12, 0, 0, 700))
        .expect("first");
    for (n, reading) in readings.iter().enumerate() {
        assert_eq!(
            reading.record.timestamp,
            first + chrono::Duration::milliseconds(100 * n as i64)
        );
        let x = reading.record.values[0].as_number().expect("x");
        assert!((x - (20000.0 + n as f64)).abs() < 0.01, "{x}");
    }
    assert_eq!(readings[0].record.values[3], FieldValue::Number(21.5));
    assert_eq!(readings[0].record.values[5], FieldValue::Number(12.0));
    assert!(readings[0].extras.iter().any(|(k, _)| k == "DataNTPTimeDelay"));
}

#[test]
fn arduino_sub_sensors_register_verify_and_mismatch() {
    let catalog = SensorCatalog::default();
    let board = SensorDescriptor::new("ARDUINO1_1_0001", "ACM0", "Arduino");

    let mut discovery = SubSensorDiscovery::new(board.clone(), catalog.clone());
    assert!(matches!(
        discovery.handle_line("D1: 21.5", host_time()).expect("early data"),
        BoardEvent::Ignored
    ));
    assert!(matches!(
        discovery.handle_line("H1: t1_T [deg C]", host_time()).expect("header"),
        BoardEvent::Discovery(DiscoveryOutcome::Pending)
    ));
    let registered = discovery
        .handle_line(
            "M1: SensorName: DS18B20, SensorID: 2837, SensorRevision: 0001",
            host_time(),
        )
        .expect("identity");
    assert!(matches!(
        registered,
        BoardEvent::Discovery(DiscoveryOutcome::Registered(ref id)) if id == "DS18B20_2837_0001"
    ));
    let stored = catalog
        .get("DS18B20_2837_0001")
        .expect("catalog")
        .expect("registered");
    assert_eq!(stored.port, "ARDUINO1_1_0001");
    assert_eq!(stored.path.as_deref(), Some("1"));

    let BoardEvent::Reading(reading) = discovery.handle_line("D1: 21.5", host_time()).expect("data")
    else {
        panic!("verified data yields a reading");
    };
    assert_eq!(reading.sensor_id(), "DS18B20_2837_0001");
    assert_eq!(reading.header.units, vec!["degC".to_string()]);

    // 重启后同一身份与目录一致
    let mut restarted = SubSensorDiscovery::new(board.clone(), catalog.clone());
    restarted.handle_line("H1: t1_T [degC]", host_time()).expect("header");
    let verified = restarted
        .handle_line(
            "M1: SensorName: DS18B20, SensorID: 2837, SensorRevision: 0001",
            host_time(),
        )
        .expect("identity");
    assert!(matches!(
        verified,
        BoardEvent::Discovery(DiscoveryOutcome::Verified(_))
    ));

    // 同一编号出现另一身份
    let mismatch = restarted
        .handle_line("M1: SensorName: BM35, SensorID: 9, SensorRevision: 0001", host_time())
        .expect("identity");
    assert!(matches!(
        mismatch,
        BoardEvent::Discovery(DiscoveryOutcome::Mismatch { ref existing, .. })
            if existing == "DS18B20_2837_0001"
    ));
    assert!(matches!(
        restarted.handle_line("D1: 1013.2", host_time()).expect("data"),
        BoardEvent::Ignored
    ));
    assert!(catalog.get("BM35_9_0001").expect("catalog").is_none());
}

/// 首次交换挂起，之后正常应答。
struct SlowFirstTransport {
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestTransport for SlowFirstTransport {
    async fn exchange(&mut self, _exchange: &Exchange) -> Result<Vec<String>, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(vec![
            "H1: t1_T [degC]".to_string(),
            "M1: SensorName: DS18B20, SensorID: 1, SensorRevision: 0001".to_string(),
            "D1: 21.5".to_string(),
            "MARTASEND".to_string(),
        ])
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn polled_timeout_skips_the_tick() {
    let mut board = SensorDescriptor::new("ARDUINO2_1_0001", "ACM1", "ActiveArduino");
    board.mode = SensorMode::Active;
    let mut driver = ActiveArduinoDriver::new(board, SensorCatalog::default());
    let resets = Arc::new(AtomicUsize::new(0));
    let mut transport = SlowFirstTransport {
        calls: Arc::new(AtomicUsize::new(0)),
        resets: resets.clone(),
    };
    let (out, mut rx) = mpsc::channel(16);
    let (stop, mut shutdown) = watch::channel(false);

    let session = tokio::spawn(async move {
        run_polled(
            &mut driver,
            &mut transport,
            Duration::from_millis(20),
            Duration::from_millis(100),
            &out,
            &mut shutdown,
        )
        .await
    });

    let reading = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reading after the timed out tick")
        .expect("reading");
    assert_eq!(reading.sensor_id(), "DS18B20_1_0001");
    assert_eq!(resets.load(Ordering::SeqCst), 1);

    stop.send(true).expect("stop");
    assert_eq!(session.await.expect("join"), SessionEnd::Shutdown);
}
