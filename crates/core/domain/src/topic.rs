//! 总线主题文法：`<station>/<sensorId>/{schema|dict|data}`。

/// 消息通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Schema,
    Dict,
    Data,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Schema => "schema",
            Channel::Dict => "dict",
            Channel::Data => "data",
        }
    }

    /// 解析主题末段；`meta` 是 `schema` 的别名。
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "schema" | "meta" => Some(Channel::Schema),
            "dict" => Some(Channel::Dict),
            "data" => Some(Channel::Data),
            _ => None,
        }
    }
}

/// 主题三元组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub station: String,
    pub sensor_id: String,
    pub channel: Channel,
}

impl Topic {
    pub fn new(station: impl Into<String>, sensor_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            station: station.into(),
            sensor_id: sensor_id.into(),
            channel,
        }
    }

    /// 解析完整主题；段数不为 3 或通道未知时返回 None。
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.trim_matches('/').split('/');
        let station = parts.next().filter(|s| !s.is_empty())?;
        let sensor_id = parts.next().filter(|s| !s.is_empty())?;
        let channel = Channel::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(station, sensor_id, channel))
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.station, self.sensor_id, self.channel.as_str())
    }
}

/// 订阅过滤器：`all` 订阅全部站点，否则只订阅一个站点。
pub fn station_filter(station: &str) -> String {
    let station = station.trim();
    if station.is_empty() || station.eq_ignore_ascii_case("all") {
        "+/#".to_string()
    } else {
        format!("{station}/#")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_round_trip_through_display() {
        let topic = Topic::new("wic", "LEMI036_1_0002", Channel::Data);
        assert_eq!(topic.to_string(), "wic/LEMI036_1_0002/data");
        assert_eq!(Topic::parse("wic/LEMI036_1_0002/data"), Some(topic));
    }

    #[test]
    fn meta_is_an_alias_of_schema() {
        let topic = Topic::parse("wic/GSM90_1_0001/meta").expect("topic");
        assert_eq!(topic.channel, Channel::Schema);
        assert!(Topic::parse("wic/GSM90_1_0001/other").is_none());
        assert!(Topic::parse("wic/GSM90_1_0001/data/extra").is_none());
    }

    #[test]
    fn station_filters() {
        assert_eq!(station_filter("all"), "+/#");
        assert_eq!(station_filter("wic"), "wic/#");
    }
}
