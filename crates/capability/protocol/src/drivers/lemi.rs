//! LEMI-025/036 磁通门磁力仪
//!
//! 每秒一帧 153 字节（小端）：
//!
//! ```text
//! 0..4     标记（sensorId[0] + sensorId[4..7]）
//! 5..11    BCD GPS 日期时间：yy mm dd hh mi ss
//! 11..27   8×i16：[0] 探头温度/100 [1] 电子温度/100 [5..8] 补偿偏置/400
//! 28..148  30×f32：10 组 x,y,z（µT）
//! 148..151 3×u8：[2] 供电电压/10
//! 151      GPS 状态 'A'/'P'
//! ```
//!
//! 一帧解出 10 条记录，时间为 GPS 时间 − 300 ms + n·100 ms。

use byteorder::{ByteOrder, LittleEndian};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use domain::{FieldSpec, FieldValue, Reading, SensorDescriptor};
use tracing::{info, warn};

use super::Fixed;
use crate::driver::{EventDrivenDriver, FailureCounter};
use crate::error::{DriverError, ProtocolError};
use crate::skew::SkewTracker;
use crate::sync::FrameSynchronizer;

pub const FRAME_LEN: usize = 153;
pub const TYPE_CODE: &str = "6hLffflll";
pub const SAMPLES_PER_FRAME: usize = 10;
/// GPS 时间与主机接收时间之间的固有时差（秒）。
pub const GPS_HOST_OFFSET_SECS: f64 = 2.03;

const GPS_LAG_MS: i64 = 300;
const SAMPLE_SPACING_MS: i64 = 100;

/// 由传感器 ID 推出帧起始标记。
pub fn frame_tag(sensor_id: &str) -> Option<Vec<u8>> {
    let bytes = sensor_id.as_bytes();
    if bytes.len() < 7 {
        return None;
    }
    let mut tag = vec![bytes[0]];
    tag.extend_from_slice(&bytes[4..7]);
    Some(tag)
}

/// 单帧解出的物理量。
#[derive(Debug, Clone, PartialEq)]
pub struct LemiFrame {
    pub gps_time: NaiveDateTime,
    pub temp_sensor: f64,
    pub temp_electronics: f64,
    pub bias: [f64; 3],
    /// 10 组 (x, y, z)，单位 nT
    pub samples: Vec<[f64; 3]>,
    pub supply_voltage: f64,
    pub gps_status: char,
}

/// 解析一帧；调用方保证长度。
pub fn parse_frame(frame: &[u8]) -> Result<LemiFrame, DriverError> {
    if frame.len() != FRAME_LEN {
        return Err(DriverError::decode(format!(
            "frame length {} != {FRAME_LEN}",
            frame.len()
        )));
    }
    let bcd = |i: usize| -> u32 { u32::from((frame[i] >> 4) * 10 + (frame[i] & 0x0f)) };
    let gps_time = NaiveDate::from_ymd_opt(2000 + bcd(5) as i32, bcd(6), bcd(7))
        .and_then(|d| d.and_hms_opt(bcd(8), bcd(9), bcd(10)))
        .ok_or_else(|| DriverError::decode("invalid gps date"))?
        - Duration::milliseconds(GPS_LAG_MS);

    let short = |k: usize| LittleEndian::read_i16(&frame[11 + 2 * k..13 + 2 * k]) as f64;
    let float = |k: usize| LittleEndian::read_f32(&frame[28 + 4 * k..32 + 4 * k]) as f64;

    let samples = (0..SAMPLES_PER_FRAME)
        .map(|n| {
            [
                float(3 * n) * 1000.0,
                float(3 * n + 1) * 1000.0,
                float(3 * n + 2) * 1000.0,
            ]
        })
        .collect();

    let gps_status = frame[151] as char;
    if gps_status != 'A' && gps_status != 'P' {
        return Err(DriverError::decode(format!("gps status {gps_status:?}")));
    }

    Ok(LemiFrame {
        gps_time,
        temp_sensor: short(0) / 100.0,
        temp_electronics: short(1) / 100.0,
        bias: [short(5) / 400.0, short(6) / 400.0, short(7) / 400.0],
        samples,
        supply_voltage: f64::from(frame[150]) / 10.0,
        gps_status,
    })
}

pub struct LemiDriver {
    fixed: Fixed,
    sync: FrameSynchronizer,
    skew: SkewTracker,
    failures: FailureCounter,
    gps_status: Option<char>,
}

impl LemiDriver {
    pub fn new(sensor: SensorDescriptor) -> Result<Self, ProtocolError> {
        let tag = frame_tag(&sensor.sensor_id).ok_or_else(|| {
            ProtocolError::ConfigParse(format!(
                "sensor id {} too short for a lemi frame tag",
                sensor.sensor_id
            ))
        })?;
        let sync = FrameSynchronizer::new(tag, FRAME_LEN)
            .ok_or_else(|| ProtocolError::ConfigParse("invalid lemi frame tag".to_string()))?;
        let fields = [
            FieldSpec::new("x", "X", "nT", 0.001),
            FieldSpec::new("y", "Y", "nT", 0.001),
            FieldSpec::new("z", "Z", "nT", 0.001),
            FieldSpec::new("t1", "T_sensor", "deg_C", 100.0),
            FieldSpec::new("t2", "T_elec", "deg_C", 100.0),
            FieldSpec::new("var2", "VDD", "V", 10.0),
        ];
        Ok(Self {
            fixed: Fixed::new(sensor, &fields, TYPE_CODE)?,
            sync,
            skew: SkewTracker::new(GPS_HOST_OFFSET_SECS),
            failures: FailureCounter::default(),
            gps_status: None,
        })
    }

    fn frame_readings(&mut self, frame: LemiFrame, received_at: NaiveDateTime) -> Vec<Reading> {
        if self.gps_status != Some(frame.gps_status) {
            info!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                status = %frame.gps_status,
                "gps_status_changed"
            );
            self.gps_status = Some(frame.gps_status);
        }
        let observation = self.skew.observe(received_at, frame.gps_time);
        if observation.warn {
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                delta_secs = observation.delta_secs,
                "large_time_difference"
            );
        }
        frame
            .samples
            .iter()
            .enumerate()
            .map(|(n, [x, y, z])| {
                let timestamp =
                    frame.gps_time + Duration::milliseconds(SAMPLE_SPACING_MS * n as i64);
                self.fixed.reading_with_skew(
                    timestamp,
                    vec![
                        FieldValue::Number(*x),
                        FieldValue::Number(*y),
                        FieldValue::Number(*z),
                        FieldValue::Number(frame.temp_sensor),
                        FieldValue::Number(frame.temp_electronics),
                        FieldValue::Number(frame.supply_voltage),
                    ],
                    &self.skew,
                )
            })
            .collect()
    }
}

impl EventDrivenDriver for LemiDriver {
    fn sensor(&self) -> &SensorDescriptor {
        &self.fixed.sensor
    }

    fn on_bytes(
        &mut self,
        bytes: &[u8],
        received_at: NaiveDateTime,
    ) -> Result<Vec<Reading>, DriverError> {
        let output = self.sync.feed(bytes);
        if let Some(event) = output.corruption {
            magbus_telemetry::record_corruption_discard();
            warn!(
                target: "magbus.driver",
                sensor_id = %self.fixed.sensor.sensor_id,
                discarded = event.discarded,
                count = event.count,
                "frame_corruption"
            );
        }
        if output.restart_requested {
            return Err(DriverError::RestartRequested(format!(
                "{} consecutive frame discards",
                self.sync.corruption_count()
            )));
        }

        let mut readings = Vec::new();
        for frame in output.frames {
            match parse_frame(&frame) {
                Ok(parsed) => {
                    self.failures.success();
                    magbus_telemetry::record_frame_decoded();
                    readings.extend(self.frame_readings(parsed, received_at));
                }
                Err(err) => {
                    magbus_telemetry::record_decode_failure();
                    warn!(
                        target: "magbus.driver",
                        sensor_id = %self.fixed.sensor.sensor_id,
                        error = %err,
                        "frame_decode_failed"
                    );
                    if self.failures.failure() {
                        return Err(DriverError::RestartRequested(format!(
                            "{} consecutive decode failures",
                            self.failures.count()
                        )));
                    }
                }
            }
        }
        Ok(readings)
    }

    fn reset(&mut self) {
        self.sync.reset();
        self.failures.success();
    }
}
