//! Рандеву-передача текущего соединения.
//!
//! Запрашивающий (`acquire`) встаёт в очередь ожидающих и блокируется, пока
//! поставщик (feeder текущего поколения) не отдаст ему значение. Поставщик,
//! в свою очередь, блокируется, пока не появится ожидающий. После `close`
//! ни один запрос не блокируется: все получают `None`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};

use crate::{connection::Connection, protocol::ClientFrame};

type Waiter<T> = oneshot::Sender<T>;

pub struct Handoff<T> {
    waiters: mpsc::UnboundedSender<Waiter<T>>,
    queue: Mutex<mpsc::UnboundedReceiver<Waiter<T>>>,
    closed: AtomicBool,
}

/// Эксклюзивное право отдавать значения; одновременно существует не
/// больше одного.
pub struct Offerer<'a, T> {
    queue: MutexGuard<'a, mpsc::UnboundedReceiver<Waiter<T>>>,
}

/// Передача соединения клиента.
pub type ConnectionHandoff = Handoff<Arc<dyn Connection>>;

impl<T> Handoff<T> {
    pub fn new() -> Self {
        let (waiters, queue) = mpsc::unbounded_channel();
        Self {
            waiters,
            queue: Mutex::new(queue),
            closed: AtomicBool::new(false),
        }
    }

    /// Ждёт значение от поставщика. `None`: передача закрыта.
    pub async fn acquire(&self) -> Option<T> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.send(tx).ok()?;
        rx.await.ok()
    }

    /// Захватывает право отдавать значения.
    pub async fn offerer(&self) -> Offerer<'_, T> {
        Offerer {
            queue: self.queue.lock().await,
        }
    }

    /// Закрывает передачу навсегда и будит всех, кто сейчас ждёт.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut queue = self.queue.lock().await;
        queue.close();
        // Брошенный oneshot будит ожидающего с ошибкой, то есть с `None`.
        while queue.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Offerer<'_, T> {
    /// Ждёт ожидающего и отдаёт ему `value`.
    ///
    /// Ожидающие, которые уже ушли (их future был отменён), пропускаются.
    /// Возвращает `false`, только если передача закрыта.
    pub async fn offer(
        &mut self,
        value: T,
    ) -> bool {
        let mut value = value;
        loop {
            let Some(waiter) = self.queue.recv().await else {
                return false;
            };
            match waiter.send(value) {
                Ok(()) => return true,
                Err(returned) => value = returned,
            }
        }
    }
}

impl ConnectionHandoff {
    /// Запись через текущее соединение; `false`, если его нет или запись
    /// не удалась.
    pub async fn write(
        &self,
        frame: ClientFrame,
    ) -> bool {
        match self.acquire().await {
            Some(conn) => conn.write(frame).await,
            None => false,
        }
    }

    pub async fn ping(&self) -> bool {
        match self.acquire().await {
            Some(conn) => conn.ping().await,
            None => false,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
