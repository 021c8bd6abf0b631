pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{FileConfig, LogFormat, LoggingConfig, Rotation};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация логирования с конфигурацией.
///
/// Ставит глобальный subscriber, поэтому вызывается один раз за процесс.
pub fn init_logging(
    mut config: LoggingConfig
) -> Result<LoggingHandle, Box<dyn std::error::Error>> {
    config.apply_env_overrides();
    config.validate()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    // Console layer
    layers.push(sinks::console::layer_with_config(&config));

    // File layer
    let file_guard = match &config.file {
        Some(file) => {
            let (file_layer, guard) = sinks::file::layer_with_config(&config, file)?;
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = %config.format,
        file_enabled = file_guard.is_some(),
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
