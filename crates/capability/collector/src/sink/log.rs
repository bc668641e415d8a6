use async_trait::async_trait;
use domain::{CanonicalRecord, FieldValue, HeaderDescriptor};
use tracing::info;

use super::Sink;
use crate::error::SinkError;

/// 每条记录一行结构化日志。
#[derive(Debug, Default)]
pub struct LogSink;

fn render(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(s) => s.clone(),
        FieldValue::Time(t) => t.to_string(),
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn write(
        &mut self,
        sensor_id: &str,
        record: &CanonicalRecord,
        header: &HeaderDescriptor,
    ) -> Result<(), SinkError> {
        let fields = header
            .keys
            .iter()
            .zip(&record.values)
            .map(|(key, value)| format!("{key}={}", render(value)))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            target: "magbus.sink",
            sensor_id,
            timestamp = %record.timestamp,
            fields = %fields,
            "record"
        );
        Ok(())
    }
}
