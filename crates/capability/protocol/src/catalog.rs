//! 传感器目录
//!
//! 读多写少的共享状态：驱动并发读取，动态发现时互斥追加。
//! 可选地把目录整体回写到 JSON 传感器清单。

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use domain::SensorDescriptor;
use tracing::info;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Arc<RwLock<Vec<SensorDescriptor>>>,
    persist_to: Option<Arc<PathBuf>>,
}

impl SensorCatalog {
    pub fn new(sensors: Vec<SensorDescriptor>) -> Self {
        Self {
            sensors: Arc::new(RwLock::new(sensors)),
            persist_to: None,
        }
    }

    /// 追加与改动时回写到指定 JSON 文件。
    pub fn with_persistence(mut self, path: impl AsRef<Path>) -> Self {
        self.persist_to = Some(Arc::new(path.as_ref().to_path_buf()));
        self
    }

    pub fn snapshot(&self) -> Result<Vec<SensorDescriptor>, ProtocolError> {
        let sensors = self.sensors.read().map_err(|_| lock_failed())?;
        Ok(sensors.clone())
    }

    pub fn get(&self, sensor_id: &str) -> Result<Option<SensorDescriptor>, ProtocolError> {
        let sensors = self.sensors.read().map_err(|_| lock_failed())?;
        Ok(sensors.iter().find(|s| s.sensor_id == sensor_id).cloned())
    }

    /// 挂在某块板卡上的子传感器。
    pub fn on_board(&self, board: &str) -> Result<Vec<SensorDescriptor>, ProtocolError> {
        let sensors = self.sensors.read().map_err(|_| lock_failed())?;
        Ok(sensors
            .iter()
            .filter(|s| s.port == board && s.path.is_some())
            .cloned()
            .collect())
    }

    /// 追加新传感器；已存在同 ID 时返回 false。
    pub fn register(&self, sensor: SensorDescriptor) -> Result<bool, ProtocolError> {
        let snapshot = {
            let mut sensors = self.sensors.write().map_err(|_| lock_failed())?;
            if sensors.iter().any(|s| s.sensor_id == sensor.sensor_id) {
                return Ok(false);
            }
            info!(
                target: "magbus.catalog",
                sensor_id = %sensor.sensor_id,
                port = %sensor.port,
                "sensor_registered"
            );
            sensors.push(sensor);
            sensors.clone()
        };
        self.persist(&snapshot)?;
        Ok(true)
    }

    /// 更新子传感器在板卡上的编号。
    pub fn relocate(&self, sensor_id: &str, path: &str) -> Result<(), ProtocolError> {
        let snapshot = {
            let mut sensors = self.sensors.write().map_err(|_| lock_failed())?;
            let sensor = sensors
                .iter_mut()
                .find(|s| s.sensor_id == sensor_id)
                .ok_or_else(|| ProtocolError::Catalog(format!("unknown sensor {sensor_id}")))?;
            sensor.path = Some(path.to_string());
            sensors.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, sensors: &[SensorDescriptor]) -> Result<(), ProtocolError> {
        let Some(path) = &self.persist_to else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(sensors)
            .map_err(|e| ProtocolError::Catalog(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| ProtocolError::Catalog(e.to_string()))?;
        std::fs::rename(&tmp, path.as_ref()).map_err(|e| ProtocolError::Catalog(e.to_string()))
    }
}

fn lock_failed() -> ProtocolError {
    ProtocolError::Catalog("lock failed".to_string())
}
