//! MQTT 订阅源：把总线消息逐条交给 [`Collector`]。

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::error::CollectorError;

/// MQTT 订阅配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `all` 或单个站点
    pub station: String,
    pub qos: u8,
}

#[derive(Debug, Clone)]
pub struct MqttCollectorSource {
    config: MqttSourceConfig,
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

impl MqttCollectorSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    pub fn filter(&self) -> String {
        domain::station_filter(&self.config.station)
    }

    /// 运行订阅循环直到停机；fail-fast 的完整性故障会中止循环。
    pub async fn run(
        &self,
        collector: &mut Collector,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CollectorError> {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 100);
        let filter = self.filter();
        let qos = qos_from_u8(self.config.qos);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(target: "magbus.collector", "collector_source_stopped");
                        return Ok(());
                    }
                    continue;
                }
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // 重连后重新订阅
                    client
                        .subscribe(filter.clone(), qos)
                        .await
                        .map_err(|err| CollectorError::Source(err.to_string()))?;
                    info!(target: "magbus.collector", filter = %filter, "collector_subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match collector.handle_message(&publish.topic, &publish.payload) {
                        Ok(_) => {}
                        Err(err @ CollectorError::Integrity { .. }) => return Err(err),
                        Err(err) => {
                            warn!(
                                target: "magbus.collector",
                                topic = %publish.topic,
                                error = %err,
                                "message_skipped"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "magbus.collector", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
