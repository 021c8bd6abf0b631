use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления lifecycle логирования.
///
/// Держит guard файлового вывода: пока handle жив, фоновый поток пишет
/// буфер на диск.
pub struct LoggingHandle {
    /// File guard (есть, если включён файловый вывод)
    file_guard: Option<WorkerGuard>,
    /// Сколько можно ждать сброса буфера при shutdown
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буферы и отключает файловый вывод.
    pub fn shutdown(mut self) {
        let Some(guard) = self.file_guard.take() else {
            return;
        };
        tracing::debug!("Flushing file log sink");

        let start = Instant::now();
        drop(guard);
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LoggingHandle")
            .field("file_sink", &self.has_file_sink())
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет handle без файлового вывода.
    #[test]
    fn test_handle_without_file_sink() {
        let handle = LoggingHandle::new(None).with_flush_timeout(Duration::from_millis(10));
        assert!(!handle.has_file_sink());
        handle.shutdown();
    }

    /// Тест проверяет, что shutdown сбрасывает guard файлового вывода.
    #[test]
    fn test_shutdown_drops_guard() {
        let (_writer, guard) = tracing_appender::non_blocking(std::io::sink());
        let handle = LoggingHandle::new(Some(guard));
        assert!(handle.has_file_sink());
        handle.shutdown();
    }
}
