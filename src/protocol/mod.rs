//! Текстовый протокол обмена с брокером.
//!
//! - `frame`: формы фреймов (исходящие `ClientFrame`, входящие `ServerFrame`).
//! - `encoder`: сериализация исходящих фреймов в байты.
//! - `decoder`: инкрементальный разбор входящего потока байт.
//! - `errors`: ошибки кодека.
//!
//! Ядро клиента оперирует только фреймами; байтовое представление нужно
//! соединению по умолчанию (`connection::StreamConnection`).

pub mod decoder;
pub mod encoder;
pub mod errors;
pub mod frame;

// Публичный экспорт всех типов из вложенных модулей, чтобы упростить доступ к
// ним из внешнего кода.
pub use decoder::*;
pub use encoder::*;
pub use errors::*;
pub use frame::*;
