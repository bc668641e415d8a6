//! 时钟偏差跟踪：仪器时钟与主机时钟差值的滚动中位数。

use std::collections::VecDeque;

use chrono::NaiveDateTime;

/// 保留的最近差值个数。
pub const SKEW_WINDOW: usize = 1000;
/// 样本数超过该值后才给出中位数。
pub const SKEW_MIN_SAMPLES: usize = 100;
/// 扣除已知偏移后仍超过该秒数时告警。
pub const SKEW_THRESHOLD_SECS: f64 = 3.0;

/// 单次观测结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewObservation {
    pub delta_secs: f64,
    /// 首次越过阈值（连续越界只报告一次）
    pub warn: bool,
}

#[derive(Debug, Clone)]
pub struct SkewTracker {
    window: VecDeque<f64>,
    offset_secs: f64,
    median: Option<f64>,
    over_threshold: u32,
}

impl SkewTracker {
    /// `offset_secs`：协议固有的已知时差（如 POS1 的 GPS 与主机时差）。
    pub fn new(offset_secs: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(SKEW_WINDOW),
            offset_secs,
            median: None,
            over_threshold: 0,
        }
    }

    pub fn observe(
        &mut self,
        reference: NaiveDateTime,
        secondary: NaiveDateTime,
    ) -> SkewObservation {
        let delta = (secondary - reference).abs();
        let delta_secs = delta.num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        if delta_secs != 0.0 {
            if self.window.len() == SKEW_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(delta_secs);
            if self.window.len() > SKEW_MIN_SAMPLES {
                self.median = median(&self.window);
            }
        }

        let warn = if delta_secs - self.offset_secs > SKEW_THRESHOLD_SECS {
            self.over_threshold += 1;
            self.over_threshold == 1
        } else {
            self.over_threshold = 0;
            false
        };
        SkewObservation { delta_secs, warn }
    }

    pub fn median(&self) -> Option<f64> {
        self.median
    }

    /// 字典中 DataNTPTimeDelay 的取值。
    pub fn dict_value(&self) -> String {
        format!("{}", self.median.unwrap_or(0.0))
    }
}

fn median(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("base")
    }

    #[test]
    fn median_appears_after_enough_samples() {
        let mut tracker = SkewTracker::new(0.0);
        for i in 0..=SKEW_MIN_SAMPLES {
            assert!(tracker.median().is_none());
            tracker.observe(base(), base() + Duration::milliseconds(100 + i as i64));
        }
        let median = tracker.median().expect("median");
        assert!((median - 0.150).abs() < 1e-9);
    }

    #[test]
    fn warns_once_per_excursion() {
        let mut tracker = SkewTracker::new(2.304);
        let late = base() + Duration::seconds(6);
        assert!(tracker.observe(base(), late).warn);
        assert!(!tracker.observe(base(), late).warn);
        assert!(!tracker.observe(base(), base() + Duration::seconds(1)).warn);
        assert!(tracker.observe(late, base()).warn);
        assert_eq!(tracker.dict_value(), "0");
    }
}
