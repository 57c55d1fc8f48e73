//! Session Loop
//!
//! Reads one request per line, dispatches it, and writes one response per
//! line, in order. Runs until the input ends, the interrupt fires, or the
//! stream fails; connection shutdown runs exactly once on every exit path.
//! A line that is not UTF-8 is answered like any other undecodable line.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{self, JsonRpcResponse, ERROR_CODE, MISSING_ID};
use super::Dispatcher;
use crate::engine::Connector;
use crate::error::Result;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The input stream reached end-of-file
    EndOfInput,
    /// The interrupt future completed
    Interrupted,
}

pub struct Session<C: Connector> {
    dispatcher: Dispatcher<C>,
}

impl<C: Connector> Session<C> {
    #[must_use]
    pub const fn new(dispatcher: Dispatcher<C>) -> Self {
        Self { dispatcher }
    }

    /// Serve requests until end of input or `interrupt` completes.
    ///
    /// # Errors
    /// Returns an I/O error when reading the input or writing a response
    /// fails. Connections are closed before returning either way.
    pub async fn run<R, W, I>(self, mut reader: R, mut writer: W, interrupt: I) -> Result<SessionEnd>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        I: Future<Output = ()>,
    {
        tracing::info!("session started");
        let mut buf = Vec::new();
        tokio::pin!(interrupt);

        let outcome = loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                () = &mut interrupt => break Ok(SessionEnd::Interrupted),
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => break Ok(SessionEnd::EndOfInput),
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(line.trim_end_matches(['\r', '\n'])).await,
                Err(e) => {
                    tracing::warn!(error = %e, "request line is not valid UTF-8");
                    JsonRpcResponse::decode_failure(&e)
                }
            };

            if let Err(e) = write_response(&mut writer, &response).await {
                break Err(e);
            }
        };

        self.dispatcher.connections().shutdown().await;
        match &outcome {
            Ok(end) => tracing::info!(reason = ?end, "session ended"),
            Err(e) => tracing::error!(error = %e, "session aborted"),
        }
        outcome
    }

    /// Decode and dispatch one non-blank line
    pub async fn handle_line(&self, line: &str) -> JsonRpcResponse {
        match protocol::decode(line) {
            Ok(request) => self.dispatcher.dispatch(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "could not decode request");
                JsonRpcResponse::decode_failure(&e)
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
    let line = response.to_line().unwrap_or_else(|e| {
        tracing::error!(error = %e, "could not encode response");
        format!(
            r#"{{"jsonrpc":"2.0","id":{MISSING_ID},"error":{{"code":{ERROR_CODE},"message":"Internal server error"}}}}"#
        )
    });

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
