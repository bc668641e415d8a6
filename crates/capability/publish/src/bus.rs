//! 总线客户端
//!
//! - [`MqttBus`]：rumqttc 异步客户端，事件循环由独立任务驱动
//! - [`RecordingBus`]：进程内记录，用于嵌入与测试

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, warn};

use crate::error::PublishError;

/// 总线发布接口；实现需支持多任务并发调用。
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError>;
}

/// MQTT 总线配置。
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
}

/// MQTT 总线。`AsyncClient` 可克隆，请求经事件循环串行发出。
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    pub fn connect(config: MqttBusConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let mut options = MqttOptions::new(config.client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "magbus.publish", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (
            Self {
                client,
                qos: qos_from_u8(config.qos),
            },
            handle,
        )
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        debug!(target: "magbus.publish", topic, payload_size = payload.len(), "mqtt_publish");
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| PublishError::Bus(err.to_string()))
    }
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// 已发布的一条消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// 进程内总线：按序记录消息。
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
    failing: bool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次发布都失败的总线。
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BusClient for RecordingBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        if self.failing {
            return Err(PublishError::Bus("bus unavailable".to_string()));
        }
        let mut messages = self.messages.lock().map_err(|_| PublishError::Lock)?;
        messages.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
