//! Connection handling
//!
//! Manages individual client connections: parses RESP commands, sends
//! replies, and interleaves the push frames of the connection's watches.

use crate::dispatch::{push_fingerprint, Dispatcher, Session};
use crate::protocol::{RespEncoder, RespParser, RespValue};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connection handler
pub struct Connection {
    /// TCP stream
    stream: TcpStream,

    /// Read buffer
    read_buffer: BytesMut,

    /// Write buffer
    write_buffer: BytesMut,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Handle the connection until the client goes away
    ///
    /// The connection's watches are dropped when this returns, whatever the outcome.
    pub async fn handle(&mut self, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
        let (session, mut pushes) = dispatcher.open_session();
        let result = self.serve(&dispatcher, &session, &mut pushes).await;
        dispatcher.close_session(&session);
        result
    }

    async fn serve(
        &mut self,
        dispatcher: &Dispatcher,
        session: &Session,
        pushes: &mut mpsc::UnboundedReceiver<RespValue>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                read = self.stream.read_buf(&mut self.read_buffer) => {
                    let n = read?;

                    // Connection closed
                    if n == 0 {
                        if self.read_buffer.is_empty() {
                            return Ok(());
                        }
                        anyhow::bail!("connection reset by peer");
                    }

                    debug!("Read {} bytes", n);

                    if !self.process_buffer(dispatcher, session, pushes).await? {
                        return Ok(());
                    }
                }

                Some(frame) = pushes.recv() => {
                    debug!("Push: {}", frame);
                    self.send_response(frame).await?;
                }
            }
        }
    }

    /// Execute every complete command in the read buffer
    ///
    /// Returns false once a protocol error made the stream unusable.
    async fn process_buffer(
        &mut self,
        dispatcher: &Dispatcher,
        session: &Session,
        pushes: &mut mpsc::UnboundedReceiver<RespValue>,
    ) -> anyhow::Result<bool> {
        loop {
            match RespParser::parse(&mut self.read_buffer) {
                Ok(Some(value)) => {
                    debug!("Parsed command: {}", value);

                    let response = dispatcher.dispatch(session, value).await;

                    debug!("Response: {}", response);

                    self.send_response(response).await?;

                    let retired = session.take_retired();
                    if !retired.is_empty() {
                        self.flush_pushes(pushes, &retired).await?;
                    }
                }
                // Need more data
                Ok(None) => return Ok(true),
                Err(e) => {
                    warn!("Protocol error: {}", e);
                    let error_response = RespValue::error(format!("ERR protocol error: {}", e));
                    self.send_response(error_response).await?;
                    return Ok(false);
                }
            }
        }
    }

    /// Send the queued push frames, dropping those of `retired` fingerprints
    ///
    /// Runs right after an unwatch reply, so nothing for those fingerprints
    /// can be queued after this drain.
    async fn flush_pushes(
        &mut self,
        pushes: &mut mpsc::UnboundedReceiver<RespValue>,
        retired: &[String],
    ) -> anyhow::Result<()> {
        while let Ok(frame) = pushes.try_recv() {
            let stale = push_fingerprint(&frame)
                .map_or(false, |fingerprint| retired.iter().any(|r| r.as_bytes() == &fingerprint[..]));
            if stale {
                debug!("Dropping push for unwatched fingerprint");
                continue;
            }
            self.send_response(frame).await?;
        }
        Ok(())
    }

    /// Send a reply or push frame to the client
    async fn send_response(&mut self, response: RespValue) -> anyhow::Result<()> {
        self.write_buffer.clear();
        RespEncoder::encode_to(&mut self.write_buffer, &response);

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;

        Ok(())
    }
}
