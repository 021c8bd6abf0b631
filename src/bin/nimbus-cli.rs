//! CLI клиент Nimbus
//!
//! Публикует сообщения, подписывается на subject и проверяет связь с
//! брокером. Настройки подключения берутся из окружения (`NIMBUS_*`) и
//! переопределяются аргументами.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nimbus::{
    logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle},
    Client, ClientConfig, ClientSettings, Message, NimbusResult,
};
use tokio::{select, task::JoinHandle};
use tracing::debug;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT"),
    ", ",
    env!("BUILD_TIME"),
    ")"
);

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "nimbus-cli")]
#[command(author = "Nimbus Contributors")]
#[command(version = VERSION)]
#[command(about = "Nimbus CLI - publish/subscribe client", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Адрес брокера
    #[arg(
        short,
        long,
        env = "NIMBUS_ADDRESS",
        help = "Адрес брокера в виде host:port"
    )]
    address: Option<String>,
    /// Имя пользователя
    #[arg(long, env = "NIMBUS_USER", help = "Имя пользователя для CONNECT")]
    user: Option<String>,
    /// Пароль
    #[arg(
        long,
        env = "NIMBUS_PASSWORD",
        help = "Пароль (можно использовать переменную окружения NIMBUS_PASSWORD)"
    )]
    password: Option<String>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить большинство логов (только error)
    #[arg(short = 'q', long, help = "Подавить логирование (только error)")]
    quiet: bool,
    /// Формат логов
    #[arg(
        long,
        default_value = "compact",
        help = "Формат логов: pretty, compact или json"
    )]
    log_format: LogFormat,
    /// Подкоманда для выполнения
    #[command(subcommand)]
    command: Commands,
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать сообщение
    Pub {
        #[arg(help = "Subject для публикации")]
        subject: String,
        #[arg(help = "Тело сообщения")]
        payload: String,
        /// Дождаться подтверждения брокером (PUB + PING/PONG)
        #[arg(long, help = "Дождаться, пока брокер обработает PUB")]
        confirm: bool,
    },
    /// Подписаться и печатать входящие сообщения
    Sub {
        #[arg(help = "Subject подписки (допускаются wildcard брокера)")]
        subject: String,
        /// Queue-группа
        #[arg(long, help = "Имя queue-группы")]
        queue: Option<String>,
        /// Автоматическая отписка после N сообщений
        #[arg(
            short = 'n',
            long,
            default_value = "0",
            help = "Отписаться после N сообщений (0 - без ограничения)"
        )]
        max: u64,
    },
    /// Проверка соединения с брокером
    Ping {
        /// Количество пингов
        #[arg(
            short = 'c',
            long,
            default_value = "1",
            help = "Количество пингов для отправки"
        )]
        count: u32,
        /// Интервал между пингами (мс)
        #[arg(
            short,
            long,
            default_value = "1000",
            help = "Интервал между пингами в миллисекундах"
        )]
        interval: u64,
    },
}

/// Точка входа в CLI
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = setup_logging(&cli)?;
    let config = build_config(&cli)?;
    debug!(address = %config.address, "Конфигурация CLI загружена");

    let client = Client::new(config);
    let runner = spawn_runner(&client);

    let result = handle_command(&cli.command, &client).await;

    client.stop();
    let cause = match runner.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            debug!(error = ?e, "Цикл клиента завершился с ошибкой");
            Some(e.client_message())
        }
        Err(e) => Some(format!("задача клиента прервана: {e}")),
    };
    logging.shutdown();

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        if let Some(cause) = cause {
            eprintln!("Причина: {cause}");
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Инициализация логирования: quiet имеет приоритет над verbose.
fn setup_logging(cli: &Cli) -> Result<LoggingHandle> {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let config = LoggingConfig {
        format: cli.log_format,
        ..LoggingConfig::with_level(level)
    };

    init_logging(config).map_err(|e| anyhow::anyhow!("Ошибка инициализации логирования: {e}"))
}

/// Настройки из окружения, поверх них аргументы командной строки.
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let settings = ClientSettings::load().context("Не удалось загрузить настройки")?;
    let mut config = ClientConfig::from(settings);

    if let Some(address) = &cli.address {
        config.address = address.clone();
    }
    if cli.user.is_some() {
        config.user = cli.user.clone();
    }
    if cli.password.is_some() {
        config.password = cli.password.clone();
    }
    Ok(config)
}

fn spawn_runner(client: &Client) -> JoinHandle<NimbusResult<()>> {
    let client = client.clone();
    tokio::spawn(async move { client.run_from_config().await })
}

/// Обработчик выполнения команд
async fn handle_command(
    command: &Commands,
    client: &Client,
) -> Result<()> {
    match command {
        Commands::Pub {
            subject,
            payload,
            confirm,
        } => publish(client, subject, payload, *confirm).await,
        Commands::Sub {
            subject,
            queue,
            max,
        } => subscribe(client, subject, queue.clone(), *max).await,
        Commands::Ping { count, interval } => {
            ping_broker(client, *count, Duration::from_millis(*interval)).await
        }
    }
}

async fn publish(
    client: &Client,
    subject: &str,
    payload: &str,
    confirm: bool,
) -> Result<()> {
    let payload = payload.to_owned().into_bytes();
    let ok = if confirm {
        client.publish_and_confirm(subject, payload).await
    } else {
        client.publish(subject, payload).await
    };

    if !ok {
        anyhow::bail!("Не удалось опубликовать сообщение в '{subject}'");
    }
    println!("OK");
    Ok(())
}

async fn subscribe(
    client: &Client,
    subject: &str,
    queue: Option<String>,
    max: u64,
) -> Result<()> {
    let mut sub = client
        .new_subscription(subject)
        .context("Неверный subject")?;
    sub.set_queue(queue)?;
    sub.set_maximum(max)?;
    sub.subscribe().await.context("Не удалось подписаться")?;
    debug!(sid = sub.sid(), subject, "Подписка оформлена");

    loop {
        select! {
            message = sub.next_message() => match message {
                Some(message) => print_message(&message),
                // Достигнут лимит или клиент остановлен
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Получен Ctrl+C");
                sub.unsubscribe().await?;
                break;
            }
        }
    }

    println!("Получено сообщений: {}", sub.received());
    Ok(())
}

fn print_message(message: &Message) {
    let time = chrono::Local::now().format("%H:%M:%S%.3f");
    let payload = String::from_utf8_lossy(&message.payload);
    match &message.reply {
        Some(reply) => println!("[{time}] {} (reply: {reply}): {payload}", message.subject),
        None => println!("[{time}] {}: {payload}", message.subject),
    }
}

async fn ping_broker(
    client: &Client,
    count: u32,
    interval: Duration,
) -> Result<()> {
    println!("🔄 PING {}", client.config().address);
    println!();

    let mut successful = 0;
    let mut total_time = Duration::ZERO;

    for i in 1..=count {
        let start = Instant::now();

        if client.ping().await {
            let elapsed = start.elapsed();
            total_time += elapsed;
            successful += 1;
            println!(
                "#{}: PONG - время={:.2}ms",
                i,
                elapsed.as_secs_f64() * 1000.0
            );
        } else {
            println!("#{i}: нет ответа");
        }

        if i < count {
            tokio::time::sleep(interval).await;
        }
    }

    println!();
    println!("--- статистика ---");
    println!("{count} отправлено, {successful} получено");
    if successful > 0 {
        println!(
            "среднее время={:.2}ms",
            total_time.as_secs_f64() * 1000.0 / f64::from(successful)
        );
    }

    if successful == 0 {
        anyhow::bail!("Брокер не ответил ни на один PING");
    }
    Ok(())
}
