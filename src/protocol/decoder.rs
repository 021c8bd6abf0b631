// Copyright 2025 Nimbus

//! Инкрементальный декодер входящих фреймов.
//!
//! Данные из сокета дописываются в `BytesMut`, после чего `decode`
//! вызывается в цикле, пока возвращает `Ok(Some(_))`. `Ok(None)` означает,
//! что фрейм ещё не пришёл целиком; потреблённые байты удаляются из буфера
//! только при полном разборе.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::{Message, ProtocolError, ServerFrame, ServerInfo, Sid};

/// Максимальная длина управляющей строки.
pub const MAX_CONTROL_LINE: usize = 4096;
/// Максимальный размер тела сообщения по умолчанию (1mb).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

#[derive(Debug)]
enum DecodeState {
    /// Ожидание управляющей строки.
    Initial,
    /// Заголовок MSG разобран, тело ещё не пришло целиком.
    AwaitingPayload {
        sid: Sid,
        subject: String,
        reply: Option<String>,
        len: usize,
    },
}

pub struct FrameDecoder {
    state: DecodeState,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DecodeState::Initial,
            max_payload,
        }
    }

    /// Обновляет лимит тела (например, по `max_payload` из INFO).
    pub fn set_max_payload(
        &mut self,
        max_payload: usize,
    ) {
        self.max_payload = max_payload;
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<ServerFrame>, ProtocolError> {
        let state = std::mem::replace(&mut self.state, DecodeState::Initial);

        match state {
            DecodeState::Initial => {
                let Some(line) = take_line(buf)? else {
                    return Ok(None);
                };
                self.parse_control_line(&line, buf)
            }
            DecodeState::AwaitingPayload {
                sid,
                subject,
                reply,
                len,
            } => {
                if buf.len() < len + 2 {
                    self.state = DecodeState::AwaitingPayload {
                        sid,
                        subject,
                        reply,
                        len,
                    };
                    return Ok(None);
                }
                if &buf[len..len + 2] != b"\r\n" {
                    return Err(ProtocolError::InvalidData(format!(
                        "payload for sid {sid} is not terminated by CRLF"
                    )));
                }
                let payload = buf.split_to(len).freeze();
                buf.advance(2);
                trace!(sid, subject = %subject, bytes = len, "Decoded MSG");
                Ok(Some(ServerFrame::Message(Message {
                    sid,
                    subject,
                    reply,
                    payload,
                })))
            }
        }
    }

    fn parse_control_line(
        &mut self,
        line: &str,
        buf: &mut BytesMut,
    ) -> Result<Option<ServerFrame>, ProtocolError> {
        let (op, rest) = match line.split_once(|c: char| c == ' ' || c == '\t') {
            Some((op, rest)) => (op, rest.trim()),
            None => (line, ""),
        };

        match op.to_ascii_uppercase().as_str() {
            "MSG" => {
                self.state = self.parse_msg_header(rest)?;
                // Тело могло прийти в том же чтении.
                self.decode(buf)
            }
            "PING" => Ok(Some(ServerFrame::Ping)),
            "PONG" => Ok(Some(ServerFrame::Pong)),
            "+OK" => Ok(Some(ServerFrame::Ok)),
            "-ERR" => Ok(Some(ServerFrame::Err(
                rest.trim_matches('\'').to_string(),
            ))),
            "INFO" => {
                let info: ServerInfo = serde_json::from_str(rest)?;
                Ok(Some(ServerFrame::Info(info)))
            }
            "" => Err(ProtocolError::InvalidData("empty control line".into())),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }

    /// `MSG <subject> <sid> [reply-to] <#bytes>`
    fn parse_msg_header(
        &self,
        args: &str,
    ) -> Result<DecodeState, ProtocolError> {
        let parts: Vec<&str> = args.split_ascii_whitespace().collect();
        let (subject, sid, reply, len) = match parts.as_slice() {
            [subject, sid, len] => (*subject, *sid, None, *len),
            [subject, sid, reply, len] => (*subject, *sid, Some(*reply), *len),
            _ => {
                return Err(ProtocolError::InvalidData(format!(
                    "MSG expects 3 or 4 arguments, got {}",
                    parts.len()
                )))
            }
        };

        let sid = sid
            .parse::<Sid>()
            .map_err(|_| ProtocolError::InvalidData(format!("invalid sid '{sid}'")))?;
        let len = len
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidData(format!("invalid payload size '{len}'")))?;

        if len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }

        Ok(DecodeState::AwaitingPayload {
            sid,
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            len,
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Извлекает из буфера строку до `\n` (без `\r\n`).
///
/// Возвращает `None`, если перевод строки ещё не пришёл.
fn take_line(buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
    let Some(pos) = memchr::memchr(b'\n', &buf[..]) else {
        if buf.len() > MAX_CONTROL_LINE {
            return Err(ProtocolError::LineTooLong(buf.len()));
        }
        return Ok(None);
    };
    if pos > MAX_CONTROL_LINE {
        return Err(ProtocolError::LineTooLong(pos));
    }

    let raw = buf.split_to(pos + 1);
    let mut end = pos;
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    let line = std::str::from_utf8(&raw[..end])?;
    Ok(Some(line.to_string()))
}
