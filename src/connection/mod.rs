//! Контракты соединения с брокером.
//!
//! Клиент не знает, как устроен транспорт: он получает его от [`Dialer`],
//! проводит через [`Handshaker`] и открывает как [`Transport`], получая
//! разделяемый [`Connection`] и последовательность входящих фреймов.
//! Реализация по умолчанию поверх TCP лежит в [`tcp`] и [`stream`].

pub mod stream;
pub mod tcp;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use nimbus_error::NimbusResult;
use tokio::sync::mpsc;

use crate::protocol::{ClientFrame, ServerFrame, DEFAULT_MAX_PAYLOAD};

pub use stream::{StreamConnection, StreamTransport};
pub use tcp::{DefaultHandshaker, TcpDialer, TcpTransport};

/// Входящие фреймы одного поколения соединения.
///
/// Последовательность заканчивается, когда `Connection::run` завершился.
pub type InboundFrames = mpsc::Receiver<ServerFrame>;

/// Активное соединение, разделяемое между всеми, кто его получил.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Записывает фрейм; `false`, если запись не удалась.
    async fn write(
        &self,
        frame: ClientFrame,
    ) -> bool;

    /// PING с ожиданием PONG; `false` при ошибке или таймауте.
    async fn ping(&self) -> bool;

    /// Цикл соединения. `Ok(())` только после `stop`, любой другой исход
    /// (EOF, ошибка чтения, нарушение протокола) возвращается как ошибка.
    async fn run(&self) -> NimbusResult<()>;

    /// Просит `run` завершиться. Повторные вызовы безопасны.
    fn stop(&self);
}

/// Транспорт после рукопожатия, готовый стать соединением.
pub trait Transport: Send + 'static {
    fn open(self) -> (Arc<dyn Connection>, InboundFrames);
}

/// Устанавливает новый транспорт.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Transport: Transport;

    async fn dial(&self) -> NimbusResult<Self::Transport>;
}

/// Проводит рукопожатие на свежем транспорте.
#[async_trait]
pub trait Handshaker<T: Transport>: Send + Sync {
    async fn handshake(
        &self,
        transport: T,
    ) -> NimbusResult<T>;
}

/// Параметры соединения, общие для всех поколений.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Сколько ждать PONG на клиентский PING
    pub ping_timeout: Duration,
    /// Таймаут записи одного фрейма
    pub write_timeout: Duration,
    /// Максимальный размер тела входящего MSG
    pub max_payload: usize,
    /// Ёмкость канала входящих фреймов
    pub inbound_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_payload: DEFAULT_MAX_PAYLOAD,
            inbound_capacity: 256,
        }
    }
}
