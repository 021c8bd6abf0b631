use std::fs;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{FileConfig, LoggingConfig, Rotation},
    formatter,
};

/// Файловый слой с ротацией и неблокирующей записью.
///
/// Guard нужно держать до конца работы: при его drop буфер сбрасывается
/// на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig,
    file: &FileConfig,
) -> std::io::Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(&file.dir)?;

    let appender = match file.rotation {
        Rotation::Hourly => rolling::hourly(&file.dir, &file.prefix),
        Rotation::Daily => rolling::daily(&file.dir, &file.prefix),
        Rotation::Never => rolling::never(&file.dir, &file.prefix),
    };
    let (writer, guard) = non_blocking(appender);

    let layer = formatter::build_formatter_from_config(config, config.format, writer, false);
    Ok((layer, guard))
}
