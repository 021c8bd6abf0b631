use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок клиента.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных и подписок
/// - 3xxx: Авторизация
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки
///
/// `TryFrom<u32>` выводится через `num_enum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidState = 1005,

    // === 2xxx: Ошибки данных и подписок ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidSubject = 2002,
    SubscriptionFrozen = 2003,
    NotSubscribed = 2004,

    // === 3xxx: Авторизация ===
    AuthFailed = 3000,
    PermissionDenied = 3001,
    InvalidCredentials = 3002,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    ReadTimeout = 6005,
    WriteTimeout = 6006,
    UnexpectedEof = 6007,
    ReconnectExhausted = 6008,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    UnknownOperation = 8001,
    InvalidUtf8 = 8002,
    InvalidInteger = 8003,
    SizeLimit = 8004,
    EncodingError = 8005,
    DecodingError = 8006,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если сессию после ошибки с этим кодом имеет смысл
    /// переустановить (reconnect).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::ConnectionClosed
                | Self::ConnectionFailed
                | Self::UnexpectedEof
                | Self::Io
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающего кода (нарушение предусловия, неверные аргументы).
    ///
    /// Диапазон `2xxx` плюс `InvalidArgs` и `InvalidState`.
    pub fn is_precondition_violation(&self) -> bool {
        (2000..=2999).contains(&self.code())
            || matches!(self, Self::InvalidArgs | Self::InvalidState)
    }

    /// Ошибка протокола или парсинга (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Ошибка сети или ввода-вывода (диапазон 6xxx).
    pub fn is_network_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists | Self::NotSubscribed => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidSubject
            | Self::SubscriptionFrozen
            | Self::InvalidState => LogLevel::Info,
            Self::Timeout
            | Self::ReadTimeout
            | Self::WriteTimeout
            | Self::ConnectionClosed
            | Self::UnexpectedEof => LogLevel::Warn,
            Self::Internal
            | Self::AuthFailed
            | Self::InvalidCredentials
            | Self::ReconnectExhausted => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
