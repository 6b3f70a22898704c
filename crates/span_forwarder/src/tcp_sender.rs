//! Length-prefixed TCP transport for span batches.
//!
//! # Wire format
//!
//! ```text
//! client → server   [u32 len][handshake JSON]      once per connection
//! client → server   [u32 len][payload]             one frame per batch
//! server → client   [u8 status][u32 len][message]  stream status
//! ```
//!
//! Lengths are big-endian. Status codes use the gRPC code space and are
//! classified with [`StatusCode::outcome`]. A server that closes its side of
//! the stream is reported as `OK`, which reopens the stream right away.
//!
//! Transport encryption is not negotiated: a `secure` configuration is
//! refused with `UNIMPLEMENTED`, which stops forwarding.

use crate::batch::SpanBatch;
use crate::config::ForwarderConfig;
use crate::error::{SenderError, StreamFailure};
use crate::outcome::StatusCode;
use crate::sender::SpanSender;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Longest status message accepted from the server.
const MAX_STATUS_MESSAGE: usize = 64 * 1024;

#[derive(Serialize)]
struct Handshake<'a> {
    license_key: &'a str,
    agent_run_token: &'a str,
    request_headers: &'a HashMap<String, String>,
}

/// Production [`SpanSender`] streaming frames over plain TCP.
pub struct TcpSender {
    config: Arc<ForwarderConfig>,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    responses: Option<mpsc::Receiver<StreamFailure>>,
}

impl TcpSender {
    pub fn new(config: ForwarderConfig) -> Self {
        Self::with_shared_config(Arc::new(config))
    }

    fn with_shared_config(config: Arc<ForwarderConfig>) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
            responses: None,
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn drop_stream(&mut self) {
        self.writer = None;
        self.responses = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl SpanSender for TcpSender {
    async fn connect(&mut self) -> Result<(), StreamFailure> {
        self.drop_stream();
        let config = Arc::clone(&self.config);
        let (read_half, write_half) = open(&config).await?;

        let (tx, rx) = mpsc::channel(self.config.response_buffer.max(1));
        self.reader = Some(tokio::spawn(read_responses(read_half, tx)));
        self.writer = Some(write_half);
        self.responses = Some(rx);

        tracing::debug!(host = %self.config.host, port = self.config.port, "tcp span stream open");
        Ok(())
    }

    async fn send(&mut self, batch: SpanBatch) -> Result<(), StreamFailure> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(StreamFailure::from_status(
                StatusCode::Unavailable,
                "send on a closed stream",
            ));
        };

        let result =
            write_frame_within(writer, batch.payload(), self.config.write_timeout, "send").await;
        if result.is_err() {
            // A partial frame leaves the stream unusable.
            self.writer = None;
        }
        result
    }

    fn take_responses(&mut self) -> Option<mpsc::Receiver<StreamFailure>> {
        self.responses.take()
    }

    async fn shutdown(&mut self) {
        let grace = self.config.shutdown_grace;

        if let Some(mut writer) = self.writer.take()
            && timeout(grace, writer.shutdown()).await.is_err()
        {
            tracing::debug!(?grace, "span stream did not flush within grace period");
        }

        // Give the server the rest of the grace period to close its side.
        if let Some(mut reader) = self.reader.take()
            && timeout(grace, &mut reader).await.is_err()
        {
            reader.abort();
        }
        self.responses = None;
    }

    fn clone_sender(&self) -> Result<Self, SenderError> {
        self.config
            .validate()
            .map_err(|e| SenderError(e.to_string()))?;
        Ok(Self::with_shared_config(Arc::clone(&self.config)))
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

impl Drop for TcpSender {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Dials the endpoint and writes the handshake.
async fn open(config: &ForwarderConfig) -> Result<(OwnedReadHalf, OwnedWriteHalf), StreamFailure> {
    if config.secure {
        return Err(StreamFailure::from_status(
            StatusCode::Unimplemented,
            "tcp sender does not negotiate transport encryption",
        ));
    }

    let endpoint = format!("{}:{}", config.host, config.port);
    let stream = match timeout(config.connect_timeout, TcpStream::connect(&endpoint)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(StreamFailure::from_status(
                StatusCode::Unavailable,
                format!("connect to {endpoint}: {e}"),
            ));
        }
        Err(_) => {
            return Err(StreamFailure::from_status(
                StatusCode::DeadlineExceeded,
                format!("connect to {endpoint} timed out after {:?}", config.connect_timeout),
            ));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "could not disable nagle on span stream");
    }

    let (read_half, mut write_half) = stream.into_split();

    let handshake = serde_json::to_vec(&Handshake {
        license_key: &config.license,
        agent_run_token: &config.run_id,
        request_headers: &config.request_headers,
    })
    .map_err(|e| StreamFailure::from_status(StatusCode::Internal, format!("handshake: {e}")))?;

    write_frame_within(&mut write_half, &handshake, config.write_timeout, "handshake").await?;

    Ok((read_half, write_half))
}

/// Writes one frame, failing with `DEADLINE_EXCEEDED` once `limit` elapses.
async fn write_frame_within<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    limit: Duration,
    what: &str,
) -> Result<(), StreamFailure> {
    match timeout(limit, write_frame(writer, payload)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StreamFailure::from_status(
            StatusCode::Unavailable,
            format!("{what}: {e}"),
        )),
        Err(_) => Err(StreamFailure::from_status(
            StatusCode::DeadlineExceeded,
            format!("{what} timed out after {limit:?}"),
        )),
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<(StatusCode, String)> {
    let code = StatusCode::from_u8(reader.read_u8().await?);
    let len = reader.read_u32().await? as usize;
    if len > MAX_STATUS_MESSAGE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("status message of {len} bytes"),
        ));
    }
    let mut message = vec![0; len];
    reader.read_exact(&mut message).await?;
    Ok((code, String::from_utf8_lossy(&message).into_owned()))
}

/// Forwards every server status frame until the stream ends.
async fn read_responses<R: AsyncRead + Unpin>(mut reader: R, responses: mpsc::Sender<StreamFailure>) {
    loop {
        let (failure, ended) = match read_status(&mut reader).await {
            Ok((code, message)) => (StreamFailure::from_status(code, message), false),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => (
                StreamFailure::from_status(StatusCode::Ok, "stream closed by server"),
                true,
            ),
            Err(e) => (
                StreamFailure::from_status(StatusCode::Unavailable, format!("receive: {e}")),
                true,
            ),
        };

        if responses.send(failure).await.is_err() || ended {
            break;
        }
    }
}
