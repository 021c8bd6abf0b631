use tokio::sync::watch;

/// Одноразовый сигнал остановки.
///
/// Взводится один раз и остаётся взведённым; ждать его можно сколько
/// угодно раз и из любого числа задач. Повторный `stop` ничего не делает.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Взводит сигнал. Возвращает `true` только для первого вызова.
    pub fn stop(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Завершается, как только сигнал взведён (сразу, если уже).
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // Отправитель живёт в self, так что канал не закроется раньше.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;

    /// Тест проверяет, что только первый stop сообщает о срабатывании.
    #[test]
    fn test_stop_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(signal.stop());
        assert!(!signal.stop());
        assert!(signal.is_stopped());
    }

    /// Тест проверяет, что ожидание пробуждается и после, и до срабатывания.
    #[tokio::test]
    async fn test_stopped_wakes_all_waiters() {
        let signal = Arc::new(StopSignal::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = Arc::clone(&signal);
                tokio::spawn(async move { signal.stopped().await })
            })
            .collect();

        tokio::task::yield_now().await;
        signal.stop();

        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter not woken")
                .unwrap();
        }

        // Уже взведённый сигнал не блокирует.
        timeout(Duration::from_millis(50), signal.stopped())
            .await
            .expect("stopped() blocked after stop");
    }
}
