use std::{collections::HashMap, sync::Arc};

use nimbus_error::{NimbusResult, SubscriptionError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Subscription, SubscriptionHandle, SubscriptionState};
use crate::{
    client::ConnectionHandoff,
    connection::Connection,
    protocol::{validate_token, ClientFrame, Message, Sid},
};

/// Реестр подписок клиента: sid → подписка.
///
/// Все изменения карты идут под одним мьютексом; сетевые записи и доставка
/// выполняются уже после его освобождения.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    handoff: Arc<ConnectionHandoff>,
    /// Ёмкость очереди доставки новой подписки
    delivery_capacity: usize,
}

struct RegistryInner {
    next_sid: Sid,
    entries: HashMap<Sid, Arc<SubscriptionState>>,
    /// Выставляется при окончательной остановке клиента.
    closed: bool,
}

impl SubscriptionRegistry {
    pub fn new(
        handoff: Arc<ConnectionHandoff>,
        delivery_capacity: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_sid: 1,
                entries: HashMap::new(),
                closed: false,
            }),
            handoff,
            delivery_capacity: delivery_capacity.max(1),
        }
    }

    /// Создаёт новую, ещё не зарегистрированную подписку с уникальным sid.
    pub fn new_subscription(
        self: &Arc<Self>,
        subject: impl Into<String>,
    ) -> NimbusResult<Subscription> {
        let subject = subject.into();
        if validate_token("subject", &subject).is_err() {
            return Err(SubscriptionError::InvalidSubject { subject }.into());
        }

        let sid = {
            let mut inner = self.inner.lock();
            let sid = inner.next_sid;
            inner.next_sid += 1;
            sid
        };

        let (tx, rx) = mpsc::channel(self.delivery_capacity);
        let state = Arc::new(SubscriptionState::new(sid, subject, tx));
        let handle = SubscriptionHandle::new(state, Arc::clone(self));
        Ok(Subscription::new(handle, rx))
    }

    pub(crate) async fn subscribe(
        &self,
        state: &Arc<SubscriptionState>,
    ) -> NimbusResult<bool> {
        let config = {
            let mut inner = self.inner.lock();
            let config = state.freeze()?;
            if inner.closed {
                // Клиент уже остановлен: сообщений не будет.
                drop(inner);
                state.close();
                debug!(sid = state.sid(), "Registry closed, subscription not registered");
                return Ok(false);
            }
            inner.entries.insert(state.sid(), Arc::clone(state));
            config
        };

        let sid = state.sid();
        debug!(sid, subject = %config.subject, queue = ?config.queue, "Subscribing");

        let Some(conn) = self.handoff.acquire().await else {
            return Ok(false);
        };
        if !state.mark_announced() {
            // Пока ждали соединение, новое поколение уже восстановило
            // подписку вместе с лимитом.
            trace!(sid, "Subscription already announced by replay");
            return Ok(true);
        }

        let mut written = conn
            .write(ClientFrame::subscribe(sid, config.subject, config.queue))
            .await;
        if config.maximum > 0 {
            written &= conn
                .write(ClientFrame::unsubscribe(sid, Some(config.maximum)))
                .await;
        }
        Ok(written)
    }

    pub(crate) async fn unsubscribe(
        &self,
        state: &Arc<SubscriptionState>,
    ) -> NimbusResult<bool> {
        let sid = state.sid();
        let removed = {
            let mut inner = self.inner.lock();
            if !state.is_frozen() {
                return Err(SubscriptionError::NotSubscribed { sid }.into());
            }
            inner.entries.remove(&sid)
        };

        if removed.is_none() {
            trace!(sid, "Subscription already removed");
            return Ok(false);
        }
        state.close();
        debug!(sid, "Unsubscribing");

        self.handoff.write(ClientFrame::unsubscribe(sid, None)).await;
        Ok(true)
    }

    /// Направляет входящее сообщение подписке по его sid.
    ///
    /// Сообщения для неизвестных sid отбрасываются.
    pub async fn deliver(
        self: &Arc<Self>,
        message: Message,
    ) -> bool {
        let state = self.inner.lock().entries.get(&message.sid).cloned();
        let Some(state) = state else {
            trace!(sid = message.sid, subject = %message.subject, "Dropping message for unknown sid");
            return false;
        };
        SubscriptionHandle::new(state, Arc::clone(self))
            .deliver(message)
            .await
    }

    /// Повторяет SUB (и UNSUB с остатком лимита) для всех подписок на
    /// новом соединении. Возвращает число восстановленных подписок.
    ///
    /// Вызывается до того, как соединение раздаётся через передачу:
    /// подписка, чья первая запись ещё ждёт соединение, после этого свою
    /// запись пропускает.
    pub async fn replay(
        &self,
        conn: &dyn Connection,
    ) -> usize {
        let states: Vec<_> = self.inner.lock().entries.values().cloned().collect();

        let mut restored = 0;
        for state in states {
            let config = state.config();
            let sid = state.sid();
            if !conn
                .write(ClientFrame::subscribe(sid, config.subject, config.queue))
                .await
            {
                continue;
            }
            state.mark_announced();
            if config.maximum > 0 {
                let remaining = config.maximum.saturating_sub(state.received());
                if remaining > 0 {
                    conn.write(ClientFrame::unsubscribe(sid, Some(remaining)))
                        .await;
                }
            }
            restored += 1;
        }
        restored
    }

    /// Окончательно очищает реестр и закрывает очереди всех подписок.
    /// Возвращает число закрытых подписок.
    pub fn teardown(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.entries.drain().map(|(_, state)| state).collect()
        };

        for state in &drained {
            state.close();
        }
        drained.len()
    }

    pub fn contains(
        &self,
        sid: Sid,
    ) -> bool {
        self.inner.lock().entries.contains_key(&sid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use async_trait::async_trait;
    use bytes::Bytes;
    use nimbus_error::StatusCode;
    use tokio::{sync::mpsc::error::TryRecvError, time::timeout};

    use super::*;

    /// Соединение, записывающее фреймы в список.
    #[derive(Default)]
    struct RecordingConnection {
        frames: Mutex<Vec<ClientFrame>>,
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        async fn write(
            &self,
            frame: ClientFrame,
        ) -> bool {
            self.frames.lock().push(frame);
            true
        }

        async fn ping(&self) -> bool {
            true
        }

        async fn run(&self) -> NimbusResult<()> {
            Ok(())
        }

        fn stop(&self) {}
    }

    /// Реестр с закрытой передачей: записи не блокируются и не проходят.
    async fn offline_registry(capacity: usize) -> Arc<SubscriptionRegistry> {
        let handoff = Arc::new(ConnectionHandoff::new());
        handoff.close().await;
        Arc::new(SubscriptionRegistry::new(handoff, capacity))
    }

    /// Реестр, которому передача всегда отдаёт одно и то же соединение.
    fn live_registry(capacity: usize) -> (Arc<SubscriptionRegistry>, Arc<RecordingConnection>) {
        let handoff = Arc::new(ConnectionHandoff::new());
        let conn = Arc::new(RecordingConnection::default());
        tokio::spawn({
            let handoff = Arc::clone(&handoff);
            let conn = Arc::clone(&conn) as Arc<dyn Connection>;
            async move {
                let mut offerer = handoff.offerer().await;
                while offerer.offer(Arc::clone(&conn)).await {}
            }
        });
        (Arc::new(SubscriptionRegistry::new(handoff, capacity)), conn)
    }

    fn count_frames(
        conn: &RecordingConnection,
        frame: &ClientFrame,
    ) -> usize {
        conn.frames.lock().iter().filter(|f| *f == frame).count()
    }

    fn msg(
        sid: Sid,
        payload: &'static [u8],
    ) -> Message {
        Message::new(sid, "orders", Bytes::from_static(payload))
    }

    /// Тест проверяет уникальность sid и проверку subject.
    #[tokio::test]
    async fn test_new_subscription_assigns_unique_sids() {
        let registry = offline_registry(1).await;
        let a = registry.new_subscription("a").unwrap();
        let b = registry.new_subscription("b").unwrap();
        assert_ne!(a.sid(), b.sid());
        assert!(!a.is_active());

        let err = registry.new_subscription("bad subject").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidSubject);
    }

    /// Тест проверяет, что регистрация замораживает конфигурацию, а
    /// повторная подписка отвергается.
    #[tokio::test]
    async fn test_subscribe_freezes() {
        let registry = offline_registry(1).await;
        let sub = registry.new_subscription("orders").unwrap();
        sub.set_queue(Some("workers".into())).unwrap();

        // Передача закрыта: запись не прошла, но подписка в реестре.
        assert!(!sub.subscribe().await.unwrap());
        assert!(sub.is_active());
        assert!(sub.is_frozen());

        let err = sub.subscribe().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<SubscriptionError>(),
            Some(&SubscriptionError::Frozen { sid: sub.sid() })
        );
        assert!(sub.set_maximum(5).is_err());
        assert!(sub.set_subject("other").is_err());
    }

    /// Тест проверяет предусловия и идемпотентность отписки.
    #[tokio::test]
    async fn test_unsubscribe_preconditions() {
        let registry = offline_registry(1).await;
        let mut sub = registry.new_subscription("orders").unwrap();

        let err = sub.unsubscribe().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NotSubscribed);

        sub.subscribe().await.unwrap();
        assert!(sub.unsubscribe().await.unwrap());
        assert!(!sub.unsubscribe().await.unwrap());
        assert!(!sub.is_active());
        assert_eq!(sub.try_next_message(), Err(TryRecvError::Disconnected));
    }

    /// Тест проверяет доставку по sid и отбрасывание неизвестных sid.
    #[tokio::test]
    async fn test_deliver_routes_by_sid() {
        let registry = offline_registry(4).await;
        let mut a = registry.new_subscription("a").unwrap();
        let mut b = registry.new_subscription("b").unwrap();
        a.subscribe().await.unwrap();
        b.subscribe().await.unwrap();

        assert!(registry.deliver(msg(b.sid(), b"to-b")).await);
        assert!(registry.deliver(msg(a.sid(), b"to-a")).await);
        assert!(!registry.deliver(msg(999, b"nobody")).await);

        assert_eq!(a.next_message().await.unwrap().payload, Bytes::from_static(b"to-a"));
        assert_eq!(b.next_message().await.unwrap().payload, Bytes::from_static(b"to-b"));
        assert_eq!(a.received(), 1);
    }

    /// Тест проверяет автоматическую отписку по достижении лимита.
    #[tokio::test]
    async fn test_max_auto_unsubscribe() {
        let registry = offline_registry(8).await;
        let mut sub = registry.new_subscription("orders").unwrap();
        sub.set_maximum(3).unwrap();
        sub.subscribe().await.unwrap();

        let sid = sub.sid();
        let mut delivered = 0;
        for _ in 0..5 {
            if registry.deliver(msg(sid, b"x")).await {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 3);
        assert_eq!(sub.received(), 3);
        assert!(!sub.is_active());

        let mut seen = 0;
        while sub.next_message().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    /// Тест проверяет, что ушедший получатель снимает подписку.
    #[tokio::test]
    async fn test_dropped_receiver_removes_subscription() {
        let registry = offline_registry(1).await;
        let sub = registry.new_subscription("orders").unwrap();
        sub.subscribe().await.unwrap();
        let handle = sub.handle();
        drop(sub);

        assert!(!registry.deliver(msg(handle.sid(), b"x")).await);
        assert!(!handle.is_active());
        assert!(registry.is_empty());
    }

    /// Тест проверяет, что доставка ждёт освобождения места в очереди.
    #[tokio::test]
    async fn test_delivery_backpressure() {
        let registry = offline_registry(1).await;
        let mut sub = registry.new_subscription("orders").unwrap();
        sub.subscribe().await.unwrap();
        let sid = sub.sid();

        assert!(registry.deliver(msg(sid, b"1")).await);
        let blocked = timeout(Duration::from_millis(50), registry.deliver(msg(sid, b"2"))).await;
        assert!(blocked.is_err());

        assert_eq!(sub.next_message().await.unwrap().payload, Bytes::from_static(b"1"));
        assert!(registry.deliver(msg(sid, b"3")).await);
    }

    /// Тест проверяет teardown: очереди закрыты, новые подписки не
    /// регистрируются.
    #[tokio::test]
    async fn test_teardown_closes_queues() {
        let registry = offline_registry(1).await;
        let mut a = registry.new_subscription("a").unwrap();
        let mut b = registry.new_subscription("b").unwrap();
        a.subscribe().await.unwrap();
        b.subscribe().await.unwrap();

        assert_eq!(registry.teardown(), 2);
        assert!(registry.is_closed());
        assert!(a.next_message().await.is_none());
        assert!(b.next_message().await.is_none());

        let mut late = registry.new_subscription("late").unwrap();
        assert!(!late.subscribe().await.unwrap());
        assert!(!late.is_active());
        assert!(late.next_message().await.is_none());
    }

    /// Тест проверяет восстановление подписок с остатком лимита.
    #[tokio::test]
    async fn test_replay_restores_subscriptions() {
        let registry = offline_registry(8).await;
        let plain = registry.new_subscription("news").unwrap();
        plain.set_queue(Some("workers".into())).unwrap();
        plain.subscribe().await.unwrap();

        let limited = registry.new_subscription("orders").unwrap();
        limited.set_maximum(5).unwrap();
        limited.subscribe().await.unwrap();
        registry.deliver(msg(limited.sid(), b"x")).await;
        registry.deliver(msg(limited.sid(), b"y")).await;

        let conn = RecordingConnection::default();
        assert_eq!(registry.replay(&conn).await, 2);

        let frames = conn.frames.lock().clone();
        assert_eq!(frames.len(), 3);
        assert!(frames.contains(&ClientFrame::subscribe(
            plain.sid(),
            "news",
            Some("workers".into())
        )));
        assert!(frames.contains(&ClientFrame::subscribe(limited.sid(), "orders", None)));
        assert!(frames.contains(&ClientFrame::unsubscribe(limited.sid(), Some(3))));
    }

    /// Тест проверяет, что отписка освобождает доставку, ждущую места в
    /// полной очереди, и остальные подписки продолжают получать сообщения.
    #[tokio::test]
    async fn test_unsubscribe_releases_blocked_delivery() {
        let registry = offline_registry(1).await;
        let stalled = registry.new_subscription("a").unwrap();
        let mut other = registry.new_subscription("b").unwrap();
        stalled.subscribe().await.unwrap();
        other.subscribe().await.unwrap();
        assert!(registry.deliver(msg(stalled.sid(), b"1")).await);

        let reader = tokio::spawn({
            let registry = Arc::clone(&registry);
            let (stalled_sid, other_sid) = (stalled.sid(), other.sid());
            async move {
                let first = registry.deliver(msg(stalled_sid, b"2")).await;
                let second = registry.deliver(msg(other_sid, b"x")).await;
                (first, second)
            }
        });

        // Читатель упирается в полную очередь.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());
        assert!(stalled.unsubscribe().await.unwrap());

        let message = timeout(Duration::from_millis(500), other.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"x"));
        assert_eq!(reader.await.unwrap(), (false, true));
        // Отброшенное сообщение не засчитывается.
        assert_eq!(stalled.received(), 1);
    }

    /// Тест проверяет, что teardown тоже освобождает заблокированную
    /// доставку.
    #[tokio::test]
    async fn test_teardown_releases_blocked_delivery() {
        let registry = offline_registry(1).await;
        let mut sub = registry.new_subscription("a").unwrap();
        sub.subscribe().await.unwrap();
        let sid = sub.sid();
        assert!(registry.deliver(msg(sid, b"1")).await);

        let reader = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.deliver(msg(sid, b"2")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(registry.teardown(), 1);
        assert!(!timeout(Duration::from_millis(500), reader).await.unwrap().unwrap());
        assert_eq!(sub.next_message().await.unwrap().payload, Bytes::from_static(b"1"));
        assert!(sub.next_message().await.is_none());
    }

    /// Тест проверяет, что доставка в уже снятую подписку не увеличивает
    /// счётчик полученных сообщений.
    #[tokio::test]
    async fn test_late_delivery_not_counted() {
        let registry = offline_registry(2).await;
        let sub = registry.new_subscription("orders").unwrap();
        sub.set_maximum(5).unwrap();
        sub.subscribe().await.unwrap();
        let handle = sub.handle();

        assert!(handle.deliver(msg(sub.sid(), b"1")).await);
        sub.unsubscribe().await.unwrap();
        assert!(!handle.deliver(msg(sub.sid(), b"2")).await);
        assert_eq!(handle.received(), 1);
    }

    /// Тест проверяет, что подписка, дождавшаяся соединения после его
    /// восстановления, не отправляет SUB повторно.
    #[tokio::test]
    async fn test_pending_subscribe_skipped_after_replay() {
        let handoff = Arc::new(ConnectionHandoff::new());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&handoff), 4));
        let sub = registry.new_subscription("orders").unwrap();
        sub.set_maximum(5).unwrap();
        let sid = sub.sid();

        let pending = tokio::spawn({
            let handle = sub.handle();
            async move { handle.subscribe().await }
        });
        timeout(Duration::from_secs(1), async {
            while !registry.contains(sid) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let conn = Arc::new(RecordingConnection::default());
        assert_eq!(registry.replay(conn.as_ref()).await, 1);

        let mut offerer = handoff.offerer().await;
        assert!(offerer.offer(Arc::clone(&conn) as Arc<dyn Connection>).await);
        assert!(pending.await.unwrap().unwrap());

        assert_eq!(
            conn.frames.lock().clone(),
            vec![
                ClientFrame::subscribe(sid, "orders", None),
                ClientFrame::unsubscribe(sid, Some(5)),
            ]
        );
    }

    /// Тест проверяет, что параллельные subscribe/unsubscribe из многих
    /// задач не теряют и не дублируют записи, а снятые подписки ничего не
    /// получают.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_unsubscribe() {
        let registry = offline_registry(4).await;

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let sub = registry.new_subscription(format!("load.{i}")).unwrap();
                    sub.subscribe().await.unwrap();
                    let removed = i % 2 == 0;
                    if removed {
                        assert!(sub.unsubscribe().await.unwrap());
                    }
                    (sub, removed)
                })
            })
            .collect();

        let mut subs = Vec::new();
        for task in tasks {
            subs.push(task.await.unwrap());
        }

        let sids: HashSet<Sid> = subs.iter().map(|(sub, _)| sub.sid()).collect();
        assert_eq!(sids.len(), 64);
        assert_eq!(registry.len(), 32);

        for (sub, removed) in &mut subs {
            let removed = *removed;
            assert_eq!(registry.contains(sub.sid()), !removed);
            assert_eq!(registry.deliver(msg(sub.sid(), b"x")).await, !removed);
            if removed {
                assert!(sub.next_message().await.is_none());
            } else {
                assert_eq!(sub.next_message().await.unwrap().payload, Bytes::from_static(b"x"));
            }
        }
    }

    /// Тест проверяет гонку автоматической отписки по лимиту с явной
    /// отпиской: подписку снимает ровно один из них, UNSUB уходит один раз.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limit_races_explicit_unsubscribe() {
        for _ in 0..50 {
            let (registry, conn) = live_registry(4);
            let mut sub = registry.new_subscription("orders").unwrap();
            sub.set_maximum(1).unwrap();
            assert!(sub.subscribe().await.unwrap());
            let sid = sub.sid();

            let by_limit = tokio::spawn({
                let registry = Arc::clone(&registry);
                async move { registry.deliver(msg(sid, b"last")).await }
            });
            let explicit = tokio::spawn({
                let handle = sub.handle();
                async move { handle.unsubscribe().await.unwrap() }
            });

            let delivered = by_limit.await.unwrap();
            explicit.await.unwrap();

            assert_eq!(count_frames(&conn, &ClientFrame::unsubscribe(sid, None)), 1);
            assert_eq!(count_frames(&conn, &ClientFrame::unsubscribe(sid, Some(1))), 1);
            assert!(!registry.contains(sid));
            if delivered {
                assert!(sub.next_message().await.is_some());
            }
            assert!(sub.next_message().await.is_none());
        }
    }
}
