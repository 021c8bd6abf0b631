pub mod client;
pub mod subscription;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use client::*;
pub use subscription::*;

use crate::{ErrorExt, StatusCode};

/// Универсальная ошибка с кодом и сообщением.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for crate::StackError {
    fn from(err: std::io::Error) -> Self {
        crate::StackError::new(ClientError::from(err))
    }
}

/// Конвертация из std::str::Utf8Error
impl From<std::str::Utf8Error> for crate::StackError {
    fn from(err: std::str::Utf8Error) -> Self {
        crate::StackError::new(GenericError::new(
            StatusCode::InvalidUtf8,
            format!("UTF-8 decoding failed: {err}"),
        ))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    /// Тест проверяет базовое поведение GenericError: статус код и вывод в
    /// строку.
    #[test]
    fn test_generic_error_basic() {
        let err = GenericError::new(StatusCode::InvalidArgs, "test message");
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
        assert_eq!(err.to_string(), "test message");
    }

    /// Тест проверяет, что as_any() позволяет сделать downcast_ref к
    /// GenericError.
    #[test]
    fn test_generic_error_as_any_downcast() {
        let err = GenericError::new(StatusCode::NotFound, "not found");
        let down = err.as_any().downcast_ref::<GenericError>();
        assert!(down.is_some());
        assert_eq!(down.unwrap().status_code(), StatusCode::NotFound);
    }

    /// Тест проверяет маппинг std::io::ErrorKind -> StatusCode при
    /// конвертации в StackError.
    #[test]
    fn test_io_error_kind_mapping() {
        let cases = vec![
            (
                io::ErrorKind::ConnectionRefused,
                StatusCode::ConnectionFailed,
                "refused",
            ),
            (
                io::ErrorKind::ConnectionReset,
                StatusCode::ConnectionClosed,
                "reset",
            ),
            (io::ErrorKind::TimedOut, StatusCode::Timeout, "timeout"),
            (
                io::ErrorKind::UnexpectedEof,
                StatusCode::UnexpectedEof,
                "eof",
            ),
            (io::ErrorKind::Other, StatusCode::Io, "other"),
        ];

        for (kind, expected_code, msg) in cases {
            let stack: crate::StackError = io::Error::new(kind, msg).into();
            assert_eq!(stack.status_code(), expected_code, "kind={kind:?}");
            // убеждаемся, что сообщение не теряется
            assert!(stack.to_string().contains(msg));
        }
    }

    /// Тест проверяет конвертацию std::str::Utf8Error -> StackError.
    #[test]
    fn test_from_utf8_error_conversion() {
        // формируем байты в рантайме, чтобы не вызывать lint о "invalid literal"
        let bytes = vec![0xff];
        let bad = std::str::from_utf8(&bytes).unwrap_err();
        let stack: crate::StackError = bad.into();
        assert_eq!(stack.status_code(), StatusCode::InvalidUtf8);
        assert!(stack.to_string().contains("UTF-8 decoding failed"));
    }
}
