pub mod config;
pub mod core;
pub mod handoff;
pub mod reconnect;
pub mod stop;

// Публичный экспорт основных типов из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use config::*;
pub use core::*;
pub use handoff::*;
pub use reconnect::*;
pub use stop::*;
