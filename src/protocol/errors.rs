use nimbus_error::{ErrorExt, StatusCode};
use thiserror::Error;

/// Ошибки кодека протокола.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Payload too large ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Control line too long ({0} bytes)")]
    LineTooLong(usize),
    #[error("UTF8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidData(_) => StatusCode::InvalidFrame,
            Self::UnknownOperation(_) => StatusCode::UnknownOperation,
            Self::PayloadTooLarge { .. } | Self::LineTooLong(_) => StatusCode::SizeLimit,
            Self::Utf8Error(_) => StatusCode::InvalidUtf8,
            Self::Json(_) => StatusCode::DecodingError,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use nimbus_error::StackError;

    use super::*;

    /// Тест проверяет, что ошибки кодека конвертируются в StackError с
    /// протокольным статусом.
    #[test]
    fn test_protocol_error_into_stack_error() {
        let stack: StackError = ProtocolError::UnknownOperation("FOO".into()).into();
        assert_eq!(stack.status_code(), StatusCode::UnknownOperation);
        assert!(stack.status_code().is_protocol_error());
        assert!(stack.to_string().contains("FOO"));
    }
}
