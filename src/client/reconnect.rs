use std::time::Duration;

/// Задержка перед повторным подключением.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Переподключаться сразу
    Immediate,
    /// Одинаковая пауза перед каждой попыткой
    Fixed(Duration),
    /// `initial * factor^(n-1)`, но не больше `max`
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

/// Политика переподключения после потери соединения.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconnectPolicy {
    /// Сколько подряд неудачных поколений допускается; `None`: без
    /// ограничений
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Backoff {
    /// Пауза перед попыткой номер `attempt` (считая с 1).
    pub fn delay(
        &self,
        attempt: u32,
    ) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * factor.max(1.0).powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Immediate
    }
}

impl ReconnectPolicy {
    /// Бесконечные немедленные переподключения.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Не переподключаться: первая же потеря соединения завершает клиента.
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            backoff: Backoff::Immediate,
        }
    }

    pub fn with_max_attempts(
        mut self,
        max_attempts: u32,
    ) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(
        mut self,
        backoff: Backoff,
    ) -> Self {
        self.backoff = backoff;
        self
    }

    /// Можно ли переподключиться после `failures` неудач подряд.
    pub fn allows(
        &self,
        failures: u32,
    ) -> bool {
        match self.max_attempts {
            Some(max) => failures <= max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет политику по умолчанию: без пауз и без лимита.
    #[test]
    fn test_default_policy_is_unbounded_immediate() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(u32::MAX));
        assert_eq!(policy.backoff.delay(5), Duration::ZERO);
    }

    /// Тест проверяет лимит попыток.
    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy::immediate().with_max_attempts(2);
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert!(!ReconnectPolicy::never().allows(1));
    }

    /// Тест проверяет рост экспоненциальной паузы и её потолок.
    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    /// Тест проверяет фиксированную паузу.
    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay(1), backoff.delay(42));
    }
}
