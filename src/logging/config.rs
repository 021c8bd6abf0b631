use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Формат вывода в консоль.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Многострочный, для разработки
    Pretty,
    /// Однострочный
    #[default]
    Compact,
    /// JSON по событию в строке
    Json,
}

/// Период ротации файла логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    /// Каталог для файлов логов
    pub dir: PathBuf,
    /// Префикс имени файла
    pub prefix: String,
    #[serde(default)]
    pub rotation: Rotation,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Уровень для целей `nimbus*` (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
    /// Файловый вывод; `None`: только консоль
    pub file: Option<FileConfig>,
}

impl LoggingConfig {
    /// Конфигурация с заданным уровнем и остальными полями по умолчанию.
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Переопределения из окружения: `NIMBUS_LOG_LEVEL`, `NIMBUS_LOG_FORMAT`,
    /// `NIMBUS_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("NIMBUS_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = std::env::var("NIMBUS_LOG_FORMAT")
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }
        if let Ok(dir) = std::env::var("NIMBUS_LOG_DIR") {
            let file = self.file.get_or_insert_with(|| FileConfig {
                dir: PathBuf::new(),
                prefix: "nimbus.log".to_string(),
                rotation: Rotation::Daily,
            });
            file.dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(format!("invalid log level '{}'", self.level));
        }
        if let Some(file) = &self.file {
            if file.prefix.is_empty() {
                return Err("log file prefix must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: наш уровень для своих целей, `warn` для
    /// зависимостей.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!("warn,nimbus={level},nimbus_cli={level}")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
            file: None,
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    /// Тест проверяет директиву фильтра.
    #[test]
    fn test_filter_directive() {
        let config = LoggingConfig::with_level("DEBUG");
        assert_eq!(
            config.build_filter_directive(),
            "warn,nimbus=debug,nimbus_cli=debug"
        );
    }

    /// Тест проверяет валидацию уровня.
    #[test]
    fn test_validate_level() {
        assert!(LoggingConfig::default().validate().is_ok());
        assert!(LoggingConfig::with_level("loud").validate().is_err());
    }

    /// Тест проверяет разбор формата из строки.
    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    /// Тест проверяет переопределения из окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("NIMBUS_LOG_LEVEL", "trace");
        std::env::set_var("NIMBUS_LOG_FORMAT", "json");
        std::env::set_var("NIMBUS_LOG_DIR", "/tmp/nimbus-logs");

        let mut config = LoggingConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("NIMBUS_LOG_LEVEL");
        std::env::remove_var("NIMBUS_LOG_FORMAT");
        std::env::remove_var("NIMBUS_LOG_DIR");

        assert_eq!(config.level, "trace");
        assert_eq!(config.format, LogFormat::Json);
        let file = config.file.unwrap();
        assert_eq!(file.dir, PathBuf::from("/tmp/nimbus-logs"));
        assert_eq!(file.prefix, "nimbus.log");
    }
}
