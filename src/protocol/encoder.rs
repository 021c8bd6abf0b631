// Copyright 2025 Nimbus

//! Энкодер исходящих фреймов.
//!
//! Каждый фрейм: управляющая строка, завершённая `\r\n`; у `PUB` за ней
//! следует тело длиной, указанной в заголовке, и ещё один `\r\n`.
//! Subject и queue проверяются на отсутствие пробельных символов: иначе
//! брокер разберёт строку иначе, чем задумано.

use bytes::{BufMut, Bytes, BytesMut};

use super::{ClientFrame, ProtocolError};

const CRLF: &[u8] = b"\r\n";

/// Структура энкодера.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Кодирует фрейм в конец `dst`.
    pub fn encode(
        frame: &ClientFrame,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match frame {
            ClientFrame::Connect(info) => {
                let json = serde_json::to_vec(info)?;
                dst.reserve(json.len() + 10);
                dst.put_slice(b"CONNECT ");
                dst.put_slice(&json);
                dst.put_slice(CRLF);
            }
            ClientFrame::Subscribe {
                sid,
                subject,
                queue,
            } => {
                validate_token("subject", subject)?;
                let line = match queue {
                    Some(queue) => {
                        validate_token("queue", queue)?;
                        format!("SUB {subject} {queue} {sid}\r\n")
                    }
                    None => format!("SUB {subject} {sid}\r\n"),
                };
                dst.put_slice(line.as_bytes());
            }
            ClientFrame::Unsubscribe { sid, max } => {
                let line = match max {
                    Some(max) => format!("UNSUB {sid} {max}\r\n"),
                    None => format!("UNSUB {sid}\r\n"),
                };
                dst.put_slice(line.as_bytes());
            }
            ClientFrame::Publish {
                subject,
                reply,
                payload,
            } => {
                validate_token("subject", subject)?;
                let header = match reply {
                    Some(reply) => {
                        validate_token("reply", reply)?;
                        format!("PUB {subject} {reply} {}\r\n", payload.len())
                    }
                    None => format!("PUB {subject} {}\r\n", payload.len()),
                };
                dst.reserve(header.len() + payload.len() + 2);
                dst.put_slice(header.as_bytes());
                dst.put_slice(payload);
                dst.put_slice(CRLF);
            }
            ClientFrame::Ping => dst.put_slice(b"PING\r\n"),
            ClientFrame::Pong => dst.put_slice(b"PONG\r\n"),
        }
        Ok(())
    }

    /// Кодирует фрейм в отдельный буфер.
    pub fn encode_to_bytes(frame: &ClientFrame) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        Self::encode(frame, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Subject, queue и reply: непустые токены без пробельных символов.
pub fn validate_token(
    kind: &str,
    value: &str,
) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidData(format!("empty {kind}")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidData(format!(
            "{kind} '{value}' contains whitespace"
        )));
    }
    Ok(())
}
