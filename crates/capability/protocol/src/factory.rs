//! 驱动工厂：按协议名构造驱动，并校验工作模式。

use std::time::Duration;

use domain::{SensorDescriptor, SensorMode};

use crate::catalog::SensorCatalog;
use crate::driver::{EventDrivenDriver, PolledDriver};
use crate::drivers::{
    active_arduino::ActiveArduinoDriver, arduino::ArduinoProtocol, cs::CsProtocol,
    env::EnvProtocol, gsm19::Gsm19Protocol, gsm90::Gsm90Protocol, lemi::LemiDriver,
    mysql::{MySqlDriver, MySqlSensorDatabase},
    onewire::{OneWireDriver, OwServerClient},
    pos1::{FRAME_TERMINATOR, Pos1Protocol}, test_source::TestSourceDriver,
};
use crate::error::ProtocolError;
use crate::line::{LineDriver, LineProtocol};

const LINE_DELIMITER: u8 = b'\n';

/// 驱动能力类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    EventDriven,
    Polled,
}

impl DriverKind {
    fn mode(self) -> SensorMode {
        match self {
            DriverKind::EventDriven => SensorMode::Passive,
            DriverKind::Polled => SensorMode::Active,
        }
    }
}

/// 构造后的驱动。
pub enum DriverHandle {
    EventDriven(Box<dyn EventDrivenDriver>),
    Polled(Box<dyn PolledDriver>),
}

impl DriverHandle {
    pub fn kind(&self) -> DriverKind {
        match self {
            DriverHandle::EventDriven(_) => DriverKind::EventDriven,
            DriverHandle::Polled(_) => DriverKind::Polled,
        }
    }

    pub fn sensor(&self) -> &SensorDescriptor {
        match self {
            DriverHandle::EventDriven(driver) => driver.sensor(),
            DriverHandle::Polled(driver) => driver.sensor(),
        }
    }
}

/// 驱动运行所需的共享上下文。
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub catalog: SensorCatalog,
    pub serial_prefix: String,
    pub poll_timeout: Duration,
    /// 描述未给出 `mysql://` 端口时 mysql 驱动使用的连接串
    pub database_url: Option<String>,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            catalog: SensorCatalog::default(),
            serial_prefix: "/dev/tty".to_string(),
            poll_timeout: Duration::from_secs(5),
            database_url: None,
        }
    }
}

type Builder = fn(SensorDescriptor, &DriverContext) -> Result<DriverHandle, ProtocolError>;

/// 协议名 → 驱动构造函数（名称大小写不敏感）。
pub struct DriverFactory {
    entries: Vec<(&'static str, DriverKind, Builder)>,
}

fn line<P: LineProtocol + 'static>(protocol: P) -> DriverHandle {
    DriverHandle::EventDriven(Box::new(LineDriver::new(protocol, LINE_DELIMITER)))
}

fn build_lemi(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(DriverHandle::EventDriven(Box::new(LemiDriver::new(sensor)?)))
}

fn build_pos1(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    let protocol = Pos1Protocol::new(sensor)?;
    Ok(DriverHandle::EventDriven(Box::new(LineDriver::new(
        protocol,
        FRAME_TERMINATOR,
    ))))
}

fn build_gsm90(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(line(Gsm90Protocol::new(sensor)?))
}

fn build_gsm19(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(line(Gsm19Protocol::new(sensor)?))
}

fn build_env(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(line(EnvProtocol::new(sensor)?))
}

fn build_cs(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(line(CsProtocol::new(sensor)?))
}

fn build_arduino(
    sensor: SensorDescriptor,
    ctx: &DriverContext,
) -> Result<DriverHandle, ProtocolError> {
    Ok(line(ArduinoProtocol::new(sensor, ctx.catalog.clone())))
}

fn build_active_arduino(
    sensor: SensorDescriptor,
    ctx: &DriverContext,
) -> Result<DriverHandle, ProtocolError> {
    Ok(DriverHandle::Polled(Box::new(ActiveArduinoDriver::new(
        sensor,
        ctx.catalog.clone(),
    ))))
}

fn build_test(sensor: SensorDescriptor, _: &DriverContext) -> Result<DriverHandle, ProtocolError> {
    Ok(DriverHandle::Polled(Box::new(TestSourceDriver::new(sensor)?)))
}

fn build_mysql(
    sensor: SensorDescriptor,
    ctx: &DriverContext,
) -> Result<DriverHandle, ProtocolError> {
    let url = MySqlDriver::connection_url(&sensor, ctx.database_url.as_deref())
        .ok_or_else(|| {
            ProtocolError::ConfigParse(format!("{}: no mysql connection url", sensor.sensor_id))
        })?;
    let database = MySqlSensorDatabase::connect_lazy(&url)?;
    Ok(DriverHandle::Polled(Box::new(MySqlDriver::new(
        sensor,
        ctx.catalog.clone(),
        Box::new(database),
    ))))
}

fn build_onewire(
    sensor: SensorDescriptor,
    ctx: &DriverContext,
) -> Result<DriverHandle, ProtocolError> {
    let client = OwServerClient::new(OneWireDriver::server_address(&sensor));
    Ok(DriverHandle::Polled(Box::new(OneWireDriver::new(
        sensor,
        ctx.catalog.clone(),
        Box::new(client),
    ))))
}

impl DriverFactory {
    /// 内置全部驱动。
    pub fn builtin() -> Self {
        let entries: Vec<(&'static str, DriverKind, Builder)> = vec![
            ("lemi", DriverKind::EventDriven, build_lemi as Builder),
            ("pos1", DriverKind::EventDriven, build_pos1 as Builder),
            ("gsm90", DriverKind::EventDriven, build_gsm90 as Builder),
            ("gsm19", DriverKind::EventDriven, build_gsm19 as Builder),
            ("env", DriverKind::EventDriven, build_env as Builder),
            ("cs", DriverKind::EventDriven, build_cs as Builder),
            ("arduino", DriverKind::EventDriven, build_arduino as Builder),
            ("activearduino", DriverKind::Polled, build_active_arduino as Builder),
            ("test", DriverKind::Polled, build_test as Builder),
            ("mysql", DriverKind::Polled, build_mysql as Builder),
            ("ow", DriverKind::Polled, build_onewire as Builder),
        ];
        Self { entries }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _, _)| *name)
    }

    pub fn kind_of(&self, protocol: &str) -> Option<DriverKind> {
        self.entry(protocol).map(|(_, kind, _)| *kind)
    }

    fn entry(&self, protocol: &str) -> Option<&(&'static str, DriverKind, Builder)> {
        self.entries
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(protocol.trim()))
    }

    /// 构造驱动；未知协议或模式不符是启动期配置错误。
    pub fn build(
        &self,
        sensor: SensorDescriptor,
        ctx: &DriverContext,
    ) -> Result<DriverHandle, ProtocolError> {
        let (_, kind, builder) = self
            .entry(&sensor.protocol)
            .ok_or_else(|| ProtocolError::UnknownProtocol(sensor.protocol.clone()))?;
        if kind.mode() != sensor.mode {
            return Err(ProtocolError::ModeMismatch {
                protocol: sensor.protocol.clone(),
                mode: format!("{:?}", sensor.mode).to_lowercase(),
            });
        }
        builder(sensor, ctx)
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let factory = DriverFactory::builtin();
        assert_eq!(factory.kind_of("GSM90"), Some(DriverKind::EventDriven));
        assert_eq!(factory.kind_of("ActiveArduino"), Some(DriverKind::Polled));
        assert_eq!(factory.kind_of("MySQL"), Some(DriverKind::Polled));
        assert_eq!(factory.kind_of("Ow"), Some(DriverKind::Polled));
        assert_eq!(factory.kind_of("owfs"), None);
        assert_eq!(factory.names().count(), 11);
    }

    #[test]
    fn builds_matching_kind() {
        let factory = DriverFactory::builtin();
        let ctx = DriverContext::default();
        let handle = factory
            .build(SensorDescriptor::new("ENV05_2_0001", "USB1", "Env"), &ctx)
            .expect("env");
        assert_eq!(handle.kind(), DriverKind::EventDriven);
        assert_eq!(handle.sensor().sensor_id, "ENV05_2_0001");
    }

    #[test]
    fn database_sources_need_active_mode_and_a_url() {
        let factory = DriverFactory::builtin();
        let ctx = DriverContext::default();
        let mut board = SensorDescriptor::new("MYSQL_cobsdb_0001", "-", "MySQL");
        assert!(matches!(
            factory.build(board.clone(), &ctx),
            Err(ProtocolError::ModeMismatch { .. })
        ));
        board.mode = SensorMode::Active;
        assert!(matches!(
            factory.build(board, &ctx),
            Err(ProtocolError::ConfigParse(_))
        ));

        let mut bus = SensorDescriptor::new("OW_rpi1_0001", "-", "Ow");
        bus.mode = SensorMode::Active;
        let handle = factory.build(bus, &ctx).expect("ow");
        assert_eq!(handle.kind(), DriverKind::Polled);
    }
}
