//! Клиент: цикл переподключения и публичный API.
//!
//! Каждое успешное подключение называется поколением. На поколение запускаются
//! три задачи: `run` соединения (в самом цикле), feeder, раздающий
//! соединение через рандеву-передачу, и reader, направляющий входящие
//! сообщения подпискам. Поколение заканчивается вместе с `run`; feeder
//! дожидается, reader нет: он может ещё дочитывать очередь, когда уже
//! началось следующее поколение.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use nimbus_error::{ClientError, NimbusResult, ResultExt};
use parking_lot::Mutex;
use tokio::{select, sync::oneshot, time::sleep};
use tracing::{debug, error, info, trace, warn};

use super::{ClientConfig, ConnectionHandoff, StopSignal};
use crate::{
    connection::{Connection, Dialer, Handshaker, InboundFrames, Transport},
    protocol::{ClientFrame, ServerFrame},
    subscription::{Subscription, SubscriptionRegistry},
};

const LIFECYCLE_IDLE: u8 = 0;
const LIFECYCLE_RUNNING: u8 = 1;
const LIFECYCLE_FINISHED: u8 = 2;

/// Фаза жизненного цикла клиента.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// `run` ещё не вызывался
    Idle,
    Dialing,
    Handshaking,
    /// Поколение соединения активно
    Connected,
    /// Остановлен по запросу
    Stopped,
    /// Завершился с ошибкой
    Failed,
}

/// Клиент pub/sub с автоматическим переподключением.
///
/// Дешёво клонируется: все клоны разделяют одно состояние. Обычно одна
/// задача держит `run`, остальные публикуют и подписываются.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    handoff: Arc<ConnectionHandoff>,
    registry: Arc<SubscriptionRegistry>,
    stop: StopSignal,
    state: Mutex<ClientState>,
    generation: AtomicU64,
    lifecycle: AtomicU8,
}

/// Итог одного поколения.
struct GenerationOutcome {
    result: NimbusResult<()>,
    /// Поколение успело что-то сделать: отдать соединение или получить
    /// входящий фрейм.
    productive: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let handoff = Arc::new(ConnectionHandoff::new());
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&handoff),
            config.delivery_capacity,
        ));

        Self {
            inner: Arc::new(ClientInner {
                config,
                handoff,
                registry,
                stop: StopSignal::new(),
                state: Mutex::new(ClientState::Idle),
                generation: AtomicU64::new(0),
                lifecycle: AtomicU8::new(LIFECYCLE_IDLE),
            }),
        }
    }

    /// Основной цикл: подключение, рукопожатие, поколения соединения и
    /// переподключения по политике из конфигурации.
    ///
    /// # Возвращает
    /// - `Ok(())` после `stop`
    /// - ошибку подключения или рукопожатия (без повторов)
    /// - `ReconnectExhausted`, если политика переподключения исчерпана
    /// - `AlreadyRunning` / `Finished` при повторном запуске
    ///
    /// В любом из завершающих исходов передача соединения закрывается, а
    /// очереди всех подписок закрываются.
    pub async fn run<D, H>(
        &self,
        dialer: D,
        handshaker: H,
    ) -> NimbusResult<()>
    where
        D: Dialer,
        H: Handshaker<D::Transport>,
    {
        self.begin()?;
        debug!("Client run loop started");

        let result = self.run_loop(&dialer, &handshaker).await;

        self.inner.handoff.close().await;
        let closed = self.inner.registry.teardown();
        self.inner
            .lifecycle
            .store(LIFECYCLE_FINISHED, Ordering::Release);

        match &result {
            Ok(()) => {
                self.set_state(ClientState::Stopped);
                info!(closed_subscriptions = closed, "Клиент остановлен");
            }
            Err(e) => {
                self.set_state(ClientState::Failed);
                error!(error = %e, closed_subscriptions = closed, "Клиент завершился с ошибкой");
            }
        }
        result
    }

    /// `run` с TCP и рукопожатием по умолчанию.
    pub async fn run_with_defaults(
        &self,
        address: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> NimbusResult<()> {
        let config = ClientConfig {
            address: address.to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
            ..self.inner.config.clone()
        };
        self.run(config.dialer(), config.handshaker()).await
    }

    /// `run` с TCP-подключением по адресу и учётным данным из конфигурации.
    pub async fn run_from_config(&self) -> NimbusResult<()> {
        let config = &self.inner.config;
        self.run(config.dialer(), config.handshaker()).await
    }

    /// Ждёт соединение текущего поколения. `None`: клиент завершён.
    pub async fn acquire_connection(&self) -> Option<Arc<dyn Connection>> {
        self.inner.handoff.acquire().await
    }

    pub async fn write(
        &self,
        frame: ClientFrame,
    ) -> bool {
        self.inner.handoff.write(frame).await
    }

    /// PING/PONG через текущее соединение.
    pub async fn ping(&self) -> bool {
        self.inner.handoff.ping().await
    }

    pub async fn publish(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> bool {
        let frame = ClientFrame::publish(subject, payload);
        trace!(frame = %frame, "Publishing");
        self.write(frame).await
    }

    /// Публикует и подтверждает доставку брокеру: PUB и PING идут через одно
    /// и то же соединение, так что PONG означает, что PUB обработан.
    pub async fn publish_and_confirm(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> bool {
        let Some(conn) = self.acquire_connection().await else {
            return false;
        };
        conn.write(ClientFrame::publish(subject, payload)).await && conn.ping().await
    }

    /// Просит клиента остановиться. Безопасно вызывать повторно и до `run`.
    pub fn stop(&self) {
        if self.inner.stop.stop() {
            info!("Stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_stopped()
    }

    /// Новая незарегистрированная подписка; перед `subscribe` её можно
    /// настроить.
    pub fn new_subscription(
        &self,
        subject: impl Into<String>,
    ) -> NimbusResult<Subscription> {
        self.inner.registry.new_subscription(subject)
    }

    /// Создаёт и сразу регистрирует подписку.
    pub async fn subscribe(
        &self,
        subject: impl Into<String>,
    ) -> NimbusResult<Subscription> {
        let sub = self.new_subscription(subject)?;
        sub.subscribe().await?;
        Ok(sub)
    }

    /// Подписка в queue-группе.
    pub async fn queue_subscribe(
        &self,
        subject: impl Into<String>,
        queue: impl Into<String>,
    ) -> NimbusResult<Subscription> {
        let sub = self.new_subscription(subject)?;
        sub.set_queue(Some(queue.into()))?;
        sub.subscribe().await?;
        Ok(sub)
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    /// Номер текущего (последнего) поколения; 0: ещё не подключались.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn begin(&self) -> NimbusResult<()> {
        match self.inner.lifecycle.compare_exchange(
            LIFECYCLE_IDLE,
            LIFECYCLE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(LIFECYCLE_RUNNING) => Err(ClientError::AlreadyRunning.into()),
            Err(_) => Err(ClientError::Finished.into()),
        }
    }

    fn set_state(
        &self,
        state: ClientState,
    ) {
        *self.inner.state.lock() = state;
    }

    async fn run_loop<D, H>(
        &self,
        dialer: &D,
        handshaker: &H,
    ) -> NimbusResult<()>
    where
        D: Dialer,
        H: Handshaker<D::Transport>,
    {
        let policy = &self.inner.config.reconnect;
        let mut failures: u32 = 0;

        loop {
            if self.inner.stop.is_stopped() {
                debug!("Stop requested, not dialing");
                return Ok(());
            }

            self.set_state(ClientState::Dialing);
            let transport = dialer.dial().await.context("Dial failed")?;
            self.set_state(ClientState::Handshaking);
            let transport = handshaker
                .handshake(transport)
                .await
                .context("Handshake failed")?;

            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            self.set_state(ClientState::Connected);
            info!(generation, "Подключение установлено");

            let outcome = self.run_generation(generation, transport).await;
            let err = match outcome.result {
                Ok(()) => {
                    debug!(generation, "Connection stopped on request");
                    return Ok(());
                }
                Err(e) => e,
            };
            if self.inner.stop.is_stopped() {
                debug!(generation, error = %err, "Connection ended while stopping");
                return Ok(());
            }

            if outcome.productive {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            if !policy.allows(failures) {
                return Err(ClientError::ReconnectExhausted {
                    attempts: failures,
                    last_error: err.to_string(),
                }
                .into());
            }

            let delay = policy.backoff.delay(failures);
            warn!(
                generation,
                error = %err,
                retryable = err.is_retryable(),
                failures,
                delay = ?delay,
                "Connection lost, reconnecting"
            );
            if !delay.is_zero() {
                select! {
                    _ = sleep(delay) => {}
                    _ = self.inner.stop.stopped() => {}
                }
            }
        }
    }

    async fn run_generation<T: Transport>(
        &self,
        generation: u64,
        transport: T,
    ) -> GenerationOutcome {
        let (conn, inbound) = transport.open();

        if generation > 1 {
            let restored = self.inner.registry.replay(conn.as_ref()).await;
            debug!(generation, restored, "Subscriptions replayed");
        }

        let productive = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let feeder = tokio::spawn(Arc::clone(&self.inner).feed(
            Arc::clone(&conn),
            done_rx,
            Arc::clone(&productive),
            generation,
        ));
        tokio::spawn(route(
            Arc::clone(&self.inner.registry),
            inbound,
            Arc::clone(&productive),
            generation,
        ));

        let result = conn.run().await;
        let _ = done_tx.send(());
        if let Err(e) = feeder.await {
            error!(generation, error = %e, "Feeder task failed");
        }

        GenerationOutcome {
            result,
            productive: productive.load(Ordering::Acquire),
        }
    }
}

impl ClientInner {
    /// Раздаёт соединение поколения, пока оно живо.
    ///
    /// При запросе остановки останавливает соединение и дожидается конца
    /// его `run`, чтобы не раздать уже мёртвое соединение.
    async fn feed(
        self: Arc<Self>,
        conn: Arc<dyn Connection>,
        mut done: oneshot::Receiver<()>,
        productive: Arc<AtomicBool>,
        generation: u64,
    ) {
        let mut offerer = self.handoff.offerer().await;

        loop {
            select! {
                biased;
                _ = &mut done => break,
                _ = self.stop.stopped() => {
                    debug!(generation, "Stopping connection");
                    conn.stop();
                    let _ = (&mut done).await;
                    break;
                }
                offered = offerer.offer(Arc::clone(&conn)) => {
                    if !offered {
                        let _ = (&mut done).await;
                        break;
                    }
                    productive.store(true, Ordering::Release);
                }
            }
        }
        trace!(generation, "Feeder finished");
    }
}

/// Направляет входящие фреймы поколения в реестр подписок.
async fn route(
    registry: Arc<SubscriptionRegistry>,
    mut inbound: InboundFrames,
    productive: Arc<AtomicBool>,
    generation: u64,
) {
    while let Some(frame) = inbound.recv().await {
        productive.store(true, Ordering::Release);
        match frame {
            ServerFrame::Message(message) => {
                registry.deliver(message).await;
            }
            ServerFrame::Err(reason) => warn!(generation, %reason, "Server reported error"),
            ServerFrame::Info(info) => {
                debug!(generation, server_id = %info.server_id, "Server INFO updated")
            }
            other => trace!(generation, op = other.op(), "Ignoring inbound frame"),
        }
    }
    trace!(generation, "Inbound frames exhausted");
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl fmt::Display for ClientState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
