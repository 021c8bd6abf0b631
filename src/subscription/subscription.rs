use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use nimbus_error::{ensure, NimbusResult, SubscriptionError};
use parking_lot::Mutex;
use tokio::{
    select,
    sync::mpsc::{self, error::TryRecvError},
};
use tracing::{debug, trace};

use super::SubscriptionRegistry;
use crate::{
    client::StopSignal,
    protocol::{validate_token, Message, Sid},
};

/// Изменяемая часть подписки. После регистрации замораживается.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionConfig {
    pub subject: String,
    pub queue: Option<String>,
    /// 0: без ограничения
    pub maximum: u64,
    frozen: bool,
}

/// Общее состояние подписки: его держат реестр, хэндлы и сама подписка.
pub(crate) struct SubscriptionState {
    sid: Sid,
    config: Mutex<SubscriptionConfig>,
    received: AtomicU64,
    /// `None` после удаления из реестра: очередь закрыта.
    outbox: Mutex<Option<mpsc::Sender<Message>>>,
    /// Становится `true` при закрытии очереди; будит доставку, ждущую места.
    closed: StopSignal,
    /// SUB уже ушёл в соединение: первой записью или восстановлением.
    announced: AtomicBool,
}

/// Подписка вместе с очередью доставки.
///
/// Управляющие методы (`subscribe`, `unsubscribe`, сеттеры) доступны через
/// `Deref` на [`SubscriptionHandle`]. Очередь закрывается, когда подписку
/// удаляют из реестра; `next_message` тогда дочитывает буфер и возвращает
/// `None`.
pub struct Subscription {
    handle: SubscriptionHandle,
    inbox: mpsc::Receiver<Message>,
}

/// Разделяемый хэндл подписки без доступа к очереди.
///
/// Позволяет отписаться из другой задачи, пока владелец [`Subscription`]
/// ждёт сообщений.
#[derive(Clone)]
pub struct SubscriptionHandle {
    state: Arc<SubscriptionState>,
    registry: Arc<SubscriptionRegistry>,
}

////////////////////////////////////////////////////////////////////////////////
// SubscriptionState
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionState {
    pub(crate) fn new(
        sid: Sid,
        subject: String,
        outbox: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            sid,
            config: Mutex::new(SubscriptionConfig {
                subject,
                queue: None,
                maximum: 0,
                frozen: false,
            }),
            received: AtomicU64::new(0),
            outbox: Mutex::new(Some(outbox)),
            closed: StopSignal::new(),
            announced: AtomicBool::new(false),
        }
    }

    pub(crate) fn sid(&self) -> Sid {
        self.sid
    }

    pub(crate) fn config(&self) -> SubscriptionConfig {
        self.config.lock().clone()
    }

    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.config.lock().frozen
    }

    /// Замораживает конфигурацию и возвращает её снимок.
    pub(crate) fn freeze(&self) -> Result<SubscriptionConfig, SubscriptionError> {
        let mut config = self.config.lock();
        if config.frozen {
            return Err(SubscriptionError::Frozen { sid: self.sid });
        }
        config.frozen = true;
        Ok(config.clone())
    }

    /// Закрывает очередь доставки. `true`, если она была открыта.
    pub(crate) fn close(&self) -> bool {
        let was_open = self.outbox.lock().take().is_some();
        self.closed.stop();
        was_open
    }

    /// Отмечает, что SUB отправлен. `true`, если раньше его не отправляли.
    pub(crate) fn mark_announced(&self) -> bool {
        !self.announced.swap(true, Ordering::AcqRel)
    }

    fn update<F>(
        &self,
        f: F,
    ) -> NimbusResult<()>
    where
        F: FnOnce(&mut SubscriptionConfig),
    {
        let mut config = self.config.lock();
        ensure!(!config.frozen, SubscriptionError::Frozen { sid: self.sid });
        f(&mut config);
        Ok(())
    }

    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.outbox.lock().clone()
    }
}

////////////////////////////////////////////////////////////////////////////////
// SubscriptionHandle
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionHandle {
    pub(crate) fn new(
        state: Arc<SubscriptionState>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self { state, registry }
    }

    pub fn sid(&self) -> Sid {
        self.state.sid
    }

    pub fn subject(&self) -> String {
        self.state.config.lock().subject.clone()
    }

    pub fn queue(&self) -> Option<String> {
        self.state.config.lock().queue.clone()
    }

    pub fn maximum(&self) -> u64 {
        self.state.config.lock().maximum
    }

    /// Сколько сообщений было поставлено в очередь доставки.
    pub fn received(&self) -> u64 {
        self.state.received()
    }

    /// Подписка зарегистрирована, её конфигурация больше не меняется.
    pub fn is_frozen(&self) -> bool {
        self.state.is_frozen()
    }

    /// Подписка сейчас присутствует в реестре.
    pub fn is_active(&self) -> bool {
        self.registry.contains(self.state.sid)
    }

    pub fn set_subject(
        &self,
        subject: impl Into<String>,
    ) -> NimbusResult<()> {
        let subject = subject.into();
        ensure!(
            validate_token("subject", &subject).is_ok(),
            SubscriptionError::InvalidSubject { subject }
        );
        self.state.update(|config| config.subject = subject)
    }

    /// Queue-группа: брокер доставит сообщение только одному участнику
    /// группы.
    pub fn set_queue(
        &self,
        queue: Option<String>,
    ) -> NimbusResult<()> {
        if let Some(queue) = &queue {
            ensure!(
                validate_token("queue", queue).is_ok(),
                SubscriptionError::InvalidQueue {
                    queue: queue.clone()
                }
            );
        }
        self.state.update(|config| config.queue = queue)
    }

    /// Лимит сообщений, после которого подписка снимается сама; 0: без
    /// лимита.
    pub fn set_maximum(
        &self,
        maximum: u64,
    ) -> NimbusResult<()> {
        self.state.update(|config| config.maximum = maximum)
    }

    /// Регистрирует подписку и отправляет SUB (и UNSUB с лимитом, если он
    /// задан).
    ///
    /// # Возвращает
    /// - `Ok(true)`, если фреймы записаны в соединение
    /// - `Ok(false)`, если подписка зарегистрирована, но запись не удалась
    ///   (она будет повторена при переподключении)
    /// - `Err(Frozen)` при повторной подписке
    pub async fn subscribe(&self) -> NimbusResult<bool> {
        self.registry.subscribe(&self.state).await
    }

    /// Удаляет подписку из реестра, закрывает очередь и отправляет UNSUB.
    ///
    /// # Возвращает
    /// - `Ok(true)`, если подписка была удалена этим вызовом
    /// - `Ok(false)`, если её уже удалили раньше (ничего не отправляется)
    /// - `Err(NotSubscribed)`, если подписку никогда не регистрировали
    pub async fn unsubscribe(&self) -> NimbusResult<bool> {
        self.registry.unsubscribe(&self.state).await
    }

    /// Доставляет сообщение в очередь и снимает подписку по достижении
    /// лимита. Может ждать, пока получатель освободит место в очереди;
    /// снятие подписки прерывает это ожидание, а сообщение отбрасывается.
    pub(crate) async fn deliver(
        &self,
        message: Message,
    ) -> bool {
        let sid = self.state.sid;
        let Some(outbox) = self.state.sender() else {
            // Подписку сняли между поиском в реестре и доставкой.
            return false;
        };

        let delivered = select! {
            biased;
            _ = self.state.closed.stopped() => {
                trace!(sid, "Subscription removed while delivery was waiting");
                return false;
            }
            sent = outbox.send(message) => sent.is_ok(),
        };
        drop(outbox);

        if !delivered {
            debug!(sid, "Receiver dropped, removing subscription");
            let _ = self.unsubscribe().await;
            return false;
        }

        let received = self.state.received.fetch_add(1, Ordering::AcqRel) + 1;
        let maximum = self.maximum();
        if maximum > 0 && received >= maximum {
            debug!(sid, received, "Delivery limit reached, unsubscribing");
            let _ = self.unsubscribe().await;
        }
        true
    }
}

////////////////////////////////////////////////////////////////////////////////
// Subscription
////////////////////////////////////////////////////////////////////////////////

impl Subscription {
    pub(crate) fn new(
        handle: SubscriptionHandle,
        inbox: mpsc::Receiver<Message>,
    ) -> Self {
        Self { handle, inbox }
    }

    /// Ждёт следующее сообщение. `None`: подписка снята и очередь пуста.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.inbox.recv().await
    }

    /// Пытается получить сообщение без ожидания.
    ///
    /// # Возвращает
    /// - `Ok(Message)`, если сообщение уже в очереди
    /// - `Err(TryRecvError::Empty)`, если очередь пуста
    /// - `Err(TryRecvError::Disconnected)`, если подписка снята и очередь
    ///   пуста
    pub fn try_next_message(&mut self) -> Result<Message, TryRecvError> {
        self.inbox.try_recv()
    }

    /// Количество сообщений, ожидающих чтения.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl Deref for Subscription {
    type Target = SubscriptionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let config = self.state.config();
        f.debug_struct("SubscriptionHandle")
            .field("sid", &self.state.sid)
            .field("subject", &config.subject)
            .field("queue", &config.queue)
            .field("maximum", &config.maximum)
            .field("received", &self.received())
            .field("frozen", &config.frozen)
            .finish()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("pending", &self.pending())
            .finish()
    }
}
