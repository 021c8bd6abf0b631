// Copyright 2025 Nimbus

//! Соединение поверх произвольного байтового потока.
//!
//! Поток делится на половины: запись идёт под асинхронным мьютексом, чтение
//! целиком принадлежит циклу `run`. Ответы PONG сопоставляются с PING в
//! порядке FIFO, поэтому очередь ожидающих пополняется под тем же мьютексом
//! записи, что и сам PING.

use std::{collections::VecDeque, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::BytesMut;
use nimbus_error::{ClientError, NimbusResult};
use parking_lot::Mutex;
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    sync::{mpsc, oneshot, Mutex as AsyncMutex},
    time::timeout,
};
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionOptions, InboundFrames, Transport};
use crate::{
    client::StopSignal,
    protocol::{ClientFrame, FrameDecoder, FrameEncoder, ServerFrame, ServerInfo},
};

const PING: &[u8] = b"PING\r\n";
const PONG: &[u8] = b"PONG\r\n";
const READ_CHUNK: usize = 4096;

/// Поток после рукопожатия вместе с уже прочитанными, но не разобранными
/// байтами.
pub struct StreamTransport<S> {
    pub(crate) stream: S,
    pub(crate) read_buf: BytesMut,
    pub(crate) options: ConnectionOptions,
    pub(crate) server_info: Option<ServerInfo>,
}

impl<S> StreamTransport<S> {
    pub fn new(
        stream: S,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            stream,
            read_buf: BytesMut::new(),
            options,
            server_info: None,
        }
    }

    /// INFO, полученный при рукопожатии.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
}

impl<S> fmt::Debug for StreamTransport<S> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("buffered", &self.read_buf.len())
            .field("options", &self.options)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn open(self) -> (Arc<dyn Connection>, InboundFrames) {
        let (conn, inbound) = StreamConnection::open(self.stream, self.read_buf, self.options);
        let conn: Arc<dyn Connection> = conn;
        (conn, inbound)
    }
}

struct ReaderState<S> {
    half: ReadHalf<S>,
    buf: BytesMut,
}

pub struct StreamConnection<S> {
    writer: AsyncMutex<WriteHalf<S>>,
    /// Забирается циклом `run`; второй запуск невозможен.
    reader: Mutex<Option<ReaderState<S>>>,
    inbound: Mutex<Option<mpsc::Sender<ServerFrame>>>,
    pending_pongs: Mutex<VecDeque<oneshot::Sender<()>>>,
    stop: StopSignal,
    options: ConnectionOptions,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Открывает соединение. `read_buf`: байты, уже прочитанные из потока
    /// при рукопожатии.
    pub fn open(
        stream: S,
        read_buf: BytesMut,
        options: ConnectionOptions,
    ) -> (Arc<Self>, InboundFrames) {
        let (half, writer) = split(stream);
        let (tx, rx) = mpsc::channel(options.inbound_capacity.max(1));

        let conn = Arc::new(Self {
            writer: AsyncMutex::new(writer),
            reader: Mutex::new(Some(ReaderState {
                half,
                buf: read_buf,
            })),
            inbound: Mutex::new(Some(tx)),
            pending_pongs: Mutex::new(VecDeque::new()),
            stop: StopSignal::new(),
            options,
        });
        (conn, rx)
    }

    async fn write_locked(
        &self,
        writer: &mut WriteHalf<S>,
        bytes: &[u8],
    ) -> bool {
        let res = timeout(self.options.write_timeout, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await;

        match res {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Write failed");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.options.write_timeout, "Write timed out");
                false
            }
        }
    }

    async fn read_loop(
        &self,
        reader: &mut ReaderState<S>,
        inbound: &mpsc::Sender<ServerFrame>,
    ) -> NimbusResult<()> {
        let mut decoder = FrameDecoder::with_max_payload(self.options.max_payload);

        loop {
            while let Some(frame) = decoder.decode(&mut reader.buf)? {
                if !self.dispatch(frame, &mut decoder, inbound).await {
                    return Ok(());
                }
            }

            reader.buf.reserve(READ_CHUNK);
            select! {
                biased;
                _ = self.stop.stopped() => {
                    debug!("Connection stop requested");
                    return Ok(());
                }
                read = reader.half.read_buf(&mut reader.buf) => match read {
                    Ok(0) => return Err(ClientError::ConnectionClosed.into()),
                    Ok(n) => trace!(bytes = n, "Read from stream"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Обрабатывает служебные фреймы на месте, остальные передаёт дальше.
    /// Возвращает `false`, если во время передачи пришёл stop.
    async fn dispatch(
        &self,
        frame: ServerFrame,
        decoder: &mut FrameDecoder,
        inbound: &mpsc::Sender<ServerFrame>,
    ) -> bool {
        match frame {
            ServerFrame::Ping => {
                let mut writer = self.writer.lock().await;
                if !self.write_locked(&mut writer, PONG).await {
                    warn!("Failed to answer server PING");
                }
                true
            }
            ServerFrame::Pong => {
                let waiter = self.pending_pongs.lock().pop_front();
                match waiter {
                    // Отправитель PING мог уже уйти по таймауту.
                    Some(waiter) => {
                        let _ = waiter.send(());
                    }
                    None => trace!("Unsolicited PONG"),
                }
                true
            }
            ServerFrame::Ok => true,
            frame => {
                if let ServerFrame::Info(ServerInfo {
                    max_payload: Some(max),
                    ..
                }) = &frame
                {
                    decoder.set_max_payload(*max);
                }

                select! {
                    biased;
                    _ = self.stop.stopped() => false,
                    sent = inbound.send(frame) => {
                        if sent.is_err() {
                            trace!("Inbound receiver dropped, frame discarded");
                        }
                        true
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn write(
        &self,
        frame: ClientFrame,
    ) -> bool {
        let bytes = match FrameEncoder::encode_to_bytes(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(op = frame.op(), error = %e, "Refusing to write invalid frame");
                return false;
            }
        };

        let mut writer = self.writer.lock().await;
        let written = self.write_locked(&mut writer, &bytes).await;
        if written {
            trace!(frame = %frame, "Frame written");
        }
        written
    }

    async fn ping(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            self.pending_pongs.lock().push_back(tx);
            if !self.write_locked(&mut writer, PING).await {
                // Под мьютексом записи никто не мог встать в очередь после нас.
                self.pending_pongs.lock().pop_back();
                return false;
            }
        }

        match timeout(self.options.ping_timeout, rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("Connection closed before PONG");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.options.ping_timeout, "PONG not received in time");
                false
            }
        }
    }

    async fn run(&self) -> NimbusResult<()> {
        let reader = self.reader.lock().take();
        let inbound = self.inbound.lock().take();
        let (Some(mut reader), Some(inbound)) = (reader, inbound) else {
            return Err(ClientError::Protocol {
                reason: "connection loop has already run".into(),
            }
            .into());
        };

        let result = self.read_loop(&mut reader, &inbound).await;

        // Ожидающие PONG уже не дождутся ответа.
        self.pending_pongs.lock().clear();
        drop(inbound);

        let shutdown = timeout(self.options.write_timeout, async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        })
        .await;
        if let Ok(Err(e)) = shutdown {
            trace!(error = %e, "Shutdown of write half failed");
        }

        match &result {
            Ok(()) => debug!("Connection loop stopped"),
            Err(e) => debug!(error = %e, "Connection loop ended"),
        }
        result
    }

    fn stop(&self) {
        self.stop.stop();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
