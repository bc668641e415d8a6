use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{CanonicalRecord, HeaderDescriptor};

use super::Sink;
use crate::error::SinkError;

/// 内存中保存的一条记录。
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub sensor_id: String,
    pub record: CanonicalRecord,
    pub header: HeaderDescriptor,
}

/// 进程内 Sink；克隆体共享同一份存储。
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    records: Arc<Mutex<Vec<StoredRecord>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(
        &mut self,
        sensor_id: &str,
        record: &CanonicalRecord,
        header: &HeaderDescriptor,
    ) -> Result<(), SinkError> {
        let mut records = self.records.lock().map_err(|_| SinkError::Lock)?;
        records.push(StoredRecord {
            sensor_id: sensor_id.to_string(),
            record: record.clone(),
            header: header.clone(),
        });
        Ok(())
    }
}
