//! Sink 与分发
//!
//! 每个 Sink 一个工作任务，由有界队列喂入；
//! 队列满时只丢弃该 Sink 的这条记录，不阻塞总线回调。

mod archive;
mod log;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use domain::{CanonicalRecord, HeaderDescriptor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SinkError;

pub use archive::ArchiveFileSink;
pub use log::LogSink;
pub use memory::{InMemorySink, StoredRecord};

/// 默认队列容量。
pub const SINK_QUEUE_CAPACITY: usize = 1024;

/// 解码后记录的去向。
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    async fn write(
        &mut self,
        sensor_id: &str,
        record: &CanonicalRecord,
        header: &HeaderDescriptor,
    ) -> Result<(), SinkError>;

    /// 队列关闭后调用。
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 分发给 Sink 的一条记录。
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub sensor_id: String,
    pub record: CanonicalRecord,
    pub header: Arc<HeaderDescriptor>,
}

struct SinkWorker {
    name: String,
    tx: mpsc::Sender<Arc<Dispatch>>,
    handle: JoinHandle<()>,
}

/// 多 Sink 分发器。
pub struct SinkFanout {
    workers: Vec<SinkWorker>,
}

impl SinkFanout {
    /// 为每个 Sink 启动工作任务；需在 tokio 运行时内调用。
    pub fn spawn(sinks: Vec<Box<dyn Sink>>, capacity: usize) -> Self {
        let workers = sinks
            .into_iter()
            .map(|mut sink| {
                let name = sink.name().to_string();
                let (tx, mut rx) = mpsc::channel::<Arc<Dispatch>>(capacity.max(1));
                let worker_name = name.clone();
                let handle = tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        if let Err(err) =
                            sink.write(&item.sensor_id, &item.record, &item.header).await
                        {
                            magbus_telemetry::record_sink_failure();
                            warn!(
                                target: "magbus.sink",
                                sink = %worker_name,
                                sensor_id = %item.sensor_id,
                                error = %err,
                                "sink_write_failed"
                            );
                        }
                    }
                    if let Err(err) = sink.close().await {
                        warn!(
                            target: "magbus.sink",
                            sink = %worker_name,
                            error = %err,
                            "sink_close_failed"
                        );
                    }
                    debug!(target: "magbus.sink", sink = %worker_name, "sink_worker_stopped");
                });
                SinkWorker { name, tx, handle }
            })
            .collect();
        Self { workers }
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    /// 投递到所有 Sink，返回成功入队的个数。
    pub fn dispatch(&self, dispatch: Dispatch) -> usize {
        let item = Arc::new(dispatch);
        let mut queued = 0;
        for worker in &self.workers {
            match worker.tx.try_send(item.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    magbus_telemetry::record_sink_queue_drop();
                    warn!(
                        target: "magbus.sink",
                        sink = %worker.name,
                        sensor_id = %item.sensor_id,
                        "sink_queue_full"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(target: "magbus.sink", sink = %worker.name, "sink_queue_closed");
                }
            }
        }
        magbus_telemetry::record_dispatched();
        queued
    }

    /// 关闭队列并等待工作任务写完剩余记录。
    pub async fn shutdown(self) {
        for worker in self.workers {
            drop(worker.tx);
            if let Err(err) = worker.handle.await {
                warn!(
                    target: "magbus.sink",
                    sink = %worker.name,
                    error = %err,
                    "sink_worker_join_failed"
                );
            }
        }
    }
}
