// MCP server over newline-delimited JSON-RPC (stdio by default)

use crate::dispatcher::Dispatcher;
use crate::protocol::{JsonRpcError, JsonRpcResponse};
use crate::transport::TransportMeta;
use anyhow::{Context, Result};
use bytes::BytesMut;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{info, warn};

/// Longest accepted request line
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    transport: TransportMeta,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            transport: TransportMeta::new(),
        }
    }

    /// Transport metadata applied to every request on this connection,
    /// e.g. a bearer token supplied at launch.
    pub fn with_transport(mut self, transport: TransportMeta) -> Self {
        self.transport = transport;
        self
    }

    /// Serve requests over stdin/stdout until stdin closes
    pub async fn start(&self) -> Result<()> {
        info!("MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// One request per line in, one response per line out. Requests are
    /// handled in arrival order; notifications produce no output. A line
    /// longer than [`MAX_LINE_LENGTH`] is discarded and answered with an
    /// invalid-request error, and serving continues with the next line.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut codec = LinesCodec::new_with_max_length(MAX_LINE_LENGTH);
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        let mut eof = false;

        loop {
            let decoded = if eof {
                codec.decode_eof(&mut buffer)
            } else {
                codec.decode(&mut buffer)
            };

            match decoded {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(response) = self.dispatcher.handle_message(line, &self.transport).await {
                        write_line(&mut writer, &response).await?;
                    }
                }
                Ok(None) if eof => break,
                Ok(None) => {
                    let read = reader
                        .read_buf(&mut buffer)
                        .await
                        .context("Failed to read request")?;
                    eof = read == 0;
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Discarding request longer than {} bytes", MAX_LINE_LENGTH);
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::invalid_request(format!(
                            "Request exceeds {} bytes",
                            MAX_LINE_LENGTH
                        )),
                    );
                    let encoded = serde_json::to_string(&response).context("Failed to encode response")?;
                    write_line(&mut writer, &encoded).await?;
                }
                Err(LinesCodecError::Io(e)) => return Err(e).context("Failed to read request"),
            }
        }

        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write response")?;
    writer.write_all(b"\n").await.context("Failed to write response")?;
    writer.flush().await.context("Failed to flush response")
}
