use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

use super::{Backoff, ReconnectPolicy};
use crate::{
    connection::{ConnectionOptions, DefaultHandshaker, TcpDialer},
    protocol::{ConnectInfo, DEFAULT_MAX_PAYLOAD},
};

/// Конфигурация клиента.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Адрес брокера (`host:port`)
    pub address: String,
    /// Имя пользователя для CONNECT (опционально)
    pub user: Option<String>,
    /// Пароль для CONNECT (опционально)
    pub password: Option<String>,
    /// Имя клиента, видимое брокеру
    pub name: Option<String>,
    /// Просить брокер подтверждать каждую команду `+OK`
    pub verbose: bool,
    /// Строгая проверка subject на стороне брокера
    pub pedantic: bool,
    /// Таймаут TCP-подключения
    pub connect_timeout: Duration,
    /// Таймаут рукопожатия целиком
    pub handshake_timeout: Duration,
    /// Сколько ждать PONG
    pub ping_timeout: Duration,
    /// Таймаут записи одного фрейма
    pub write_timeout: Duration,
    /// Ёмкость очереди доставки одной подписки
    pub delivery_capacity: usize,
    /// Ёмкость канала входящих фреймов соединения
    pub inbound_capacity: usize,
    /// Максимальный размер тела MSG до получения INFO
    pub max_payload: usize,
    pub reconnect: ReconnectPolicy,
}

/// Настройки, загружаемые из окружения (`NIMBUS_*`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSettings {
    pub address: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub verbose: bool,
    pub pedantic: bool,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    pub delivery_capacity: usize,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        user: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.user = user;
        self.password = password;
        self
    }

    pub fn with_reconnect(
        mut self,
        reconnect: ReconnectPolicy,
    ) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            ping_timeout: self.ping_timeout,
            write_timeout: self.write_timeout,
            max_payload: self.max_payload,
            inbound_capacity: self.inbound_capacity,
        }
    }

    pub fn connect_info(&self) -> ConnectInfo {
        ConnectInfo {
            verbose: self.verbose,
            pedantic: self.pedantic,
            name: self.name.clone(),
            user: self.user.clone(),
            pass: self.password.clone(),
            ..Default::default()
        }
    }

    /// Dialer по умолчанию для этого адреса.
    pub fn dialer(&self) -> TcpDialer {
        TcpDialer::new(
            self.address.clone(),
            self.connect_timeout,
            self.connection_options(),
        )
    }

    /// Рукопожатие по умолчанию с учётными данными из конфигурации.
    pub fn handshaker(&self) -> DefaultHandshaker {
        DefaultHandshaker::new(self.connect_info(), self.handshake_timeout)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4222".to_string(),
            user: None,
            password: None,
            name: None,
            verbose: false,
            pedantic: false,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            delivery_capacity: 1,
            inbound_capacity: 256,
            max_payload: DEFAULT_MAX_PAYLOAD,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Значения по умолчанию
            .set_default("address", "127.0.0.1:4222")?
            .set_default("verbose", false)?
            .set_default("pedantic", false)?
            .set_default("connect_timeout_ms", 5_000)?
            .set_default("handshake_timeout_ms", 5_000)?
            .set_default("ping_timeout_ms", 10_000)?
            .set_default("delivery_capacity", 1)?
            // Переменные окружения с префиксом NIMBUS_
            .add_source(Environment::with_prefix("NIMBUS"))
            .build()?;

        cfg.try_deserialize()
    }
}

impl From<ClientSettings> for ClientConfig {
    fn from(s: ClientSettings) -> Self {
        let backoff = match s.reconnect_delay_ms {
            Some(0) | None => Backoff::Immediate,
            Some(ms) => Backoff::Fixed(Duration::from_millis(ms)),
        };

        Self {
            address: s.address,
            user: s.user,
            password: s.password,
            name: s.name,
            verbose: s.verbose,
            pedantic: s.pedantic,
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            ping_timeout: Duration::from_millis(s.ping_timeout_ms),
            delivery_capacity: s.delivery_capacity.max(1),
            reconnect: ReconnectPolicy {
                max_attempts: s.max_reconnect_attempts,
                backoff,
            },
            ..Default::default()
        }
    }
}
