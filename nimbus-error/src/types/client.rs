use std::io;

use crate::{ErrorExt, StatusCode};

/// Ошибки клиента: установка сессии, транспорт и протокол.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Ошибка подключения к серверу
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    ConnectionTimeout,
    /// Соединение закрыто сервером
    ConnectionClosed,
    /// Ошибка от сервера (`-ERR`)
    ServerError { message: String },
    /// Ошибка аутентификации при рукопожатии
    AuthenticationFailed { reason: String },
    /// Ошибка ввода-вывода
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    /// Нарушение протокола (неожиданный фрейм и т.п.)
    Protocol { reason: String },
    /// Ошибка кодирования фрейма
    EncodingError { reason: String },
    /// Ошибка декодирования фрейма
    DecodingError { reason: String },
    /// Таймаут чтения
    ReadTimeout,
    /// Таймаут записи
    WriteTimeout,
    /// Цикл `run` уже запущен
    AlreadyRunning,
    /// Клиент уже завершил работу и не может быть запущен повторно
    Finished,
    /// Исчерпан лимит попыток переподключения
    ReconnectExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for ClientError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { address, reason } => {
                write!(f, "Failed to connect to {address}: {reason}")
            }
            Self::ConnectionTimeout => write!(f, "Connection timeout"),
            Self::ConnectionClosed => write!(f, "Connection closed by server"),
            Self::ServerError { message } => write!(f, "Server error: {message}"),
            Self::AuthenticationFailed { reason } => {
                write!(f, "Authentication failed: {reason}")
            }
            Self::Io { kind, message } => write!(f, "I/O error ({kind:?}): {message}"),
            Self::Protocol { reason } => write!(f, "Protocol error: {reason}"),
            Self::EncodingError { reason } => write!(f, "Encoding error: {reason}"),
            Self::DecodingError { reason } => write!(f, "Decoding error: {reason}"),
            Self::ReadTimeout => write!(f, "Read timeout"),
            Self::WriteTimeout => write!(f, "Write timeout"),
            Self::AlreadyRunning => write!(f, "Client run loop is already active"),
            Self::Finished => write!(f, "Client has already finished"),
            Self::ReconnectExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "Reconnect attempts exhausted after {attempts} failures: {last_error}"
            ),
        }
    }
}

impl std::error::Error for ClientError {}

impl ErrorExt for ClientError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectionTimeout => StatusCode::Timeout,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::ServerError { .. } => StatusCode::ProtocolError,
            Self::AuthenticationFailed { .. } => StatusCode::AuthFailed,
            Self::Io { kind, .. } => match kind {
                io::ErrorKind::ConnectionRefused => StatusCode::ConnectionFailed,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => StatusCode::ConnectionClosed,
                io::ErrorKind::TimedOut => StatusCode::Timeout,
                io::ErrorKind::UnexpectedEof => StatusCode::UnexpectedEof,
                io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                _ => StatusCode::Io,
            },
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::EncodingError { .. } => StatusCode::EncodingError,
            Self::DecodingError { .. } => StatusCode::DecodingError,
            Self::ReadTimeout => StatusCode::ReadTimeout,
            Self::WriteTimeout => StatusCode::WriteTimeout,
            Self::AlreadyRunning | Self::Finished => StatusCode::InvalidState,
            Self::ReconnectExhausted { .. } => StatusCode::ReconnectExhausted,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ConnectionFailed { address, .. } => {
                format!("Failed to connect to {address}")
            }
            Self::AuthenticationFailed { .. } => "Authentication failed".to_string(),
            Self::Io { .. } => "Network error occurred".to_string(),
            Self::EncodingError { .. } => "Failed to encode frame".to_string(),
            Self::DecodingError { .. } => "Failed to decode frame".to_string(),
            Self::ReconnectExhausted { attempts, .. } => {
                format!("Gave up after {attempts} reconnect attempts")
            }
            other => other.to_string(),
        }
    }
}

// Конверсия из io::Error
impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};

    use super::*;

    /// Тест проверяет статус код, Display и client_message для
    /// ConnectionFailed.
    #[test]
    fn test_connection_failed() {
        let err = ClientError::ConnectionFailed {
            address: "localhost:4222".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ConnectionFailed);
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.client_message(), "Failed to connect to localhost:4222");
    }

    /// Тест проверяет, что AuthenticationFailed не раскрывает детали в
    /// client_message.
    #[test]
    fn test_authentication_failed() {
        let err = ClientError::AuthenticationFailed {
            reason: "invalid password".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::AuthFailed);
        assert!(!err.client_message().contains("invalid password"));
    }

    /// Тест проверяет конвертацию io::Error -> ClientError.
    #[test]
    fn test_io_error_conversion() {
        let client_err: ClientError = io::Error::new(ErrorKind::BrokenPipe, "broken pipe").into();

        assert_eq!(client_err.status_code(), StatusCode::ConnectionClosed);
        assert_eq!(client_err.client_message(), "Network error occurred");
        assert!(matches!(
            client_err,
            ClientError::Io {
                kind: ErrorKind::BrokenPipe,
                ..
            }
        ));
    }

    /// Тест проверяет, что ошибки сессии считаются retryable, а ошибки
    /// жизненного цикла клиента нет.
    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::ConnectionClosed.status_code().is_retryable());
        assert!(ClientError::ReadTimeout.status_code().is_retryable());
        assert!(!ClientError::AlreadyRunning.status_code().is_retryable());
        assert!(!ClientError::AuthenticationFailed {
            reason: String::new()
        }
        .status_code()
        .is_retryable());
    }

    /// Тест проверяет Display и client_message для ReconnectExhausted.
    #[test]
    fn test_reconnect_exhausted() {
        let err = ClientError::ReconnectExhausted {
            attempts: 5,
            last_error: "Connection closed by server".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ReconnectExhausted);
        assert!(err.to_string().contains("after 5 failures"));
        assert!(err.to_string().contains("Connection closed by server"));
        assert_eq!(err.client_message(), "Gave up after 5 reconnect attempts");
    }

    /// Тест проверяет client_message для EncodingError и DecodingError.
    #[test]
    fn test_encoding_and_decoding_client_messages() {
        let enc = ClientError::EncodingError {
            reason: "bad".to_string(),
        };
        let dec = ClientError::DecodingError {
            reason: "bad".to_string(),
        };
        assert_eq!(enc.client_message(), "Failed to encode frame");
        assert_eq!(dec.client_message(), "Failed to decode frame");
        assert_eq!(enc.status_code(), StatusCode::EncodingError);
        assert_eq!(dec.status_code(), StatusCode::DecodingError);
    }
}
