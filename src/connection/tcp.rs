use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use nimbus_error::{ClientError, NimbusResult, ResultExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, trace};

use super::{ConnectionOptions, Dialer, Handshaker, StreamTransport};
use crate::protocol::{ClientFrame, ConnectInfo, FrameDecoder, FrameEncoder, ServerFrame};

/// Транспорт по умолчанию.
pub type TcpTransport = StreamTransport<TcpStream>;

/// Dialer по умолчанию: TCP-подключение с таймаутом.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
    connect_timeout: Duration,
    options: ConnectionOptions,
}

/// Рукопожатие по умолчанию: INFO → CONNECT + PING → PONG.
#[derive(Debug, Clone)]
pub struct DefaultHandshaker {
    connect: ConnectInfo,
    timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TcpDialer {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            options,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl DefaultHandshaker {
    pub fn new(
        connect: ConnectInfo,
        timeout: Duration,
    ) -> Self {
        Self { connect, timeout }
    }

    /// Рукопожатие с учётными данными и остальными полями по умолчанию.
    pub fn with_credentials(
        user: Option<String>,
        pass: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self::new(
            ConnectInfo {
                user,
                pass,
                ..Default::default()
            },
            timeout,
        )
    }

    async fn exchange<S>(
        &self,
        transport: &mut StreamTransport<S>,
    ) -> NimbusResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut decoder = FrameDecoder::with_max_payload(transport.options.max_payload);

        let info = match read_frame(transport, &mut decoder).await? {
            ServerFrame::Info(info) => info,
            other => {
                return Err(ClientError::Protocol {
                    reason: format!("expected INFO, got {}", other.op()),
                }
                .into())
            }
        };
        debug!(server_id = %info.server_id, version = %info.version, "Received server INFO");
        if let Some(max) = info.max_payload {
            transport.options.max_payload = max;
        }

        let mut out = BytesMut::new();
        FrameEncoder::encode(&ClientFrame::Connect(self.connect.clone()), &mut out)?;
        FrameEncoder::encode(&ClientFrame::Ping, &mut out)?;
        transport.stream.write_all(&out).await?;
        transport.stream.flush().await?;

        loop {
            match read_frame(transport, &mut decoder).await? {
                ServerFrame::Pong => break,
                // verbose-режим подтверждает CONNECT отдельным +OK.
                ServerFrame::Ok | ServerFrame::Info(_) => continue,
                ServerFrame::Err(reason) => {
                    return Err(ClientError::AuthenticationFailed { reason }.into())
                }
                other => {
                    return Err(ClientError::Protocol {
                        reason: format!("unexpected {} during handshake", other.op()),
                    }
                    .into())
                }
            }
        }

        transport.server_info = Some(info);
        Ok(())
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Transport = TcpTransport;

    async fn dial(&self) -> NimbusResult<TcpTransport> {
        debug!("Connecting to {}", self.address);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)?
            .map_err(|e| ClientError::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;
        debug!("Connection established with {}", self.address);

        Ok(StreamTransport::new(stream, self.options.clone()))
    }
}

#[async_trait]
impl<S> Handshaker<StreamTransport<S>> for DefaultHandshaker
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn handshake(
        &self,
        mut transport: StreamTransport<S>,
    ) -> NimbusResult<StreamTransport<S>> {
        timeout(self.timeout, self.exchange(&mut transport))
            .await
            .map_err(|_| ClientError::ConnectionTimeout)?
            .context("Handshake failed")?;
        trace!("Handshake completed");
        Ok(transport)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние методы и функции
////////////////////////////////////////////////////////////////////////////////

/// Читает следующий фрейм; лишние байты остаются в буфере транспорта.
async fn read_frame<S>(
    transport: &mut StreamTransport<S>,
    decoder: &mut FrameDecoder,
) -> NimbusResult<ServerFrame>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    loop {
        if let Some(frame) = decoder.decode(&mut transport.read_buf)? {
            return Ok(frame);
        }
        transport.read_buf.reserve(1024);
        let n = transport.stream.read_buf(&mut transport.read_buf).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed.into());
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
