// Copyright 2025 Nimbus

//! Фреймы протокола.
//!
//! Исходящие (`ClientFrame`): CONNECT, SUB, UNSUB, PUB, PING, PONG.
//! Входящие (`ServerFrame`): INFO, MSG, PING, PONG, +OK, -ERR.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Идентификатор подписки (sid), уникальный в пределах клиента.
pub type Sid = u64;

/// Фрейм, который клиент отправляет брокеру.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Connect(ConnectInfo),
    Subscribe {
        sid: Sid,
        subject: String,
        queue: Option<String>,
    },
    /// `max = None`: немедленная отписка; `Some(n)`: брокер перестанет
    /// доставлять после `n` сообщений по этому sid.
    Unsubscribe {
        sid: Sid,
        max: Option<u64>,
    },
    Publish {
        subject: String,
        reply: Option<String>,
        payload: Bytes,
    },
    Ping,
    Pong,
}

/// Фрейм, полученный от брокера.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Info(ServerInfo),
    Message(Message),
    Ping,
    Pong,
    Ok,
    Err(String),
}

/// Входящее сообщение, адресованное конкретной подписке.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sid подписки, указанный в предшествующем SUB
    pub sid: Sid,
    /// Фактический subject, в который было опубликовано сообщение
    pub subject: String,
    /// Subject для ответа (если издатель его указал)
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Содержимое `INFO {json}` от брокера.
///
/// Неизвестные поля игнорируются, отсутствующие получают значения по
/// умолчанию.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub max_payload: Option<usize>,
    #[serde(default)]
    pub auth_required: bool,
}

/// Содержимое `CONNECT {json}`, отправляемое при рукопожатии.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectInfo {
    pub verbose: bool,
    pub pedantic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    pub lang: String,
    pub version: String,
}

impl ClientFrame {
    pub fn subscribe(
        sid: Sid,
        subject: impl Into<String>,
        queue: Option<String>,
    ) -> Self {
        Self::Subscribe {
            sid,
            subject: subject.into(),
            queue,
        }
    }

    pub fn unsubscribe(
        sid: Sid,
        max: Option<u64>,
    ) -> Self {
        Self::Unsubscribe { sid, max }
    }

    pub fn publish(
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::Publish {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    /// Имя операции протокола (для логов).
    pub fn op(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT",
            Self::Subscribe { .. } => "SUB",
            Self::Unsubscribe { .. } => "UNSUB",
            Self::Publish { .. } => "PUB",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

impl ServerFrame {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Info(_) => "INFO",
            Self::Message(_) => "MSG",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Ok => "+OK",
            Self::Err(_) => "-ERR",
        }
    }
}

impl Message {
    pub fn new(
        sid: Sid,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sid,
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            name: None,
            user: None,
            pass: None,
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl fmt::Display for ClientFrame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Subscribe {
                sid,
                subject,
                queue: Some(queue),
            } => write!(f, "SUB {subject} {queue} {sid}"),
            Self::Subscribe { sid, subject, .. } => write!(f, "SUB {subject} {sid}"),
            Self::Unsubscribe { sid, max: Some(max) } => write!(f, "UNSUB {sid} {max}"),
            Self::Unsubscribe { sid, .. } => write!(f, "UNSUB {sid}"),
            Self::Publish {
                subject, payload, ..
            } => write!(f, "PUB {subject} ({} bytes)", payload.len()),
            other => f.write_str(other.op()),
        }
    }
}
