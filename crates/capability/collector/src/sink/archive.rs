//! 归档文件 Sink
//!
//! `<dir>/<sensorId>/<sensorId>_<YYYY-MM-DD>.bin`：新文件先写一行头部，
//! 之后追加定长小端记录。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::{CanonicalRecord, HeaderDescriptor};
use magbus_codec::Schema;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::Sink;
use crate::error::SinkError;

#[derive(Debug)]
pub struct ArchiveFileSink {
    root: PathBuf,
    schemas: HashMap<String, Schema>,
}

impl ArchiveFileSink {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            schemas: HashMap::new(),
        }
    }

    /// 记录所在的日文件。
    pub fn file_for(&self, sensor_id: &str, record: &CanonicalRecord) -> PathBuf {
        self.root.join(sensor_id).join(format!(
            "{sensor_id}_{}.bin",
            record.timestamp.format("%Y-%m-%d")
        ))
    }

    fn schema_for(&mut self, header: &HeaderDescriptor) -> Result<&Schema, SinkError> {
        match self.schemas.entry(header.sensor_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().header().same_layout(header) {
                    entry.insert(Schema::new(header.clone())?);
                }
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(Schema::new(header.clone())?)),
        }
    }
}

#[async_trait]
impl Sink for ArchiveFileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(
        &mut self,
        sensor_id: &str,
        record: &CanonicalRecord,
        header: &HeaderDescriptor,
    ) -> Result<(), SinkError> {
        let path = self.file_for(sensor_id, record);
        let (header_line, packed) = {
            let schema = self.schema_for(header)?;
            (schema.header_line(), schema.pack(record)?)
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if file.metadata().await?.len() == 0 {
            file.write_all(header_line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            info!(target: "magbus.sink", sensor_id, path = %path.display(), "archive_file_started");
        }
        file.write_all(&packed).await?;
        file.flush().await?;
        Ok(())
    }
}
