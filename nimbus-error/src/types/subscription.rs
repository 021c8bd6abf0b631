use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Нарушения предусловий при работе с подписками.
///
/// Это ошибки вызывающего кода, а не операционные сбои: их не нужно
/// повторять, их нужно исправлять. В тестах их удобно проверять через
/// `unwrap_err()`, в рабочем коде логировать.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Попытка изменить конфигурацию или повторно подписать уже
    /// зарегистрированную подписку
    Frozen { sid: u64 },
    /// Отписка подписки, которая никогда не была подписана
    NotSubscribed { sid: u64 },
    /// Недопустимый subject (пустой или содержит пробельные символы)
    InvalidSubject { subject: String },
    /// Недопустимое имя queue-группы
    InvalidQueue { queue: String },
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Frozen { sid } => write!(f, "Subscription {sid} is frozen"),
            Self::NotSubscribed { sid } => {
                write!(f, "Subscription {sid} was never subscribed")
            }
            Self::InvalidSubject { subject } => write!(f, "Invalid subject '{subject}'"),
            Self::InvalidQueue { queue } => write!(f, "Invalid queue group '{queue}'"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl ErrorExt for SubscriptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Frozen { .. } => StatusCode::SubscriptionFrozen,
            Self::NotSubscribed { .. } => StatusCode::NotSubscribed,
            Self::InvalidSubject { .. } | Self::InvalidQueue { .. } => StatusCode::InvalidSubject,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет коды статуса и классификацию как нарушение предусловия.
    #[test]
    fn test_status_codes_are_precondition_violations() {
        let errors = [
            SubscriptionError::Frozen { sid: 1 },
            SubscriptionError::NotSubscribed { sid: 2 },
            SubscriptionError::InvalidSubject {
                subject: "a b".to_string(),
            },
            SubscriptionError::InvalidQueue {
                queue: "q q".to_string(),
            },
        ];

        for err in errors {
            assert!(
                err.status_code().is_precondition_violation(),
                "{err} должна быть нарушением предусловия"
            );
            assert!(!err.status_code().is_retryable());
        }
    }

    /// Тест проверяет Display для замороженной подписки.
    #[test]
    fn test_frozen_display() {
        let err = SubscriptionError::Frozen { sid: 42 };
        assert_eq!(err.to_string(), "Subscription 42 is frozen");
        assert_eq!(err.client_message(), err.to_string());
    }
}
