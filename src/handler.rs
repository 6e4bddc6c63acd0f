//! Per-connection request handling.
//!
//! A connection carries exactly one request: the handler performs a single
//! bounded read, answers with a single response and closes the stream. There
//! is no reassembly of requests split across reads.

use crate::dispatcher::Dispatcher;
use crate::protocol::{self, Frame, Response};
use crate::registry::COMMANDS;
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tracing::{debug, error, trace, Instrument};

/// Limits applied to every connection
#[derive(Debug, Clone, Copy)]
pub struct HandlerLimits {
    /// Largest request accepted in the single read
    pub max_request_size: usize,
    /// How long to wait for the request to arrive
    pub read_timeout: Duration,
}

/// Handle a single client connection end to end.
pub async fn handle_connection<S>(
    mut stream: S,
    dispatcher: Arc<Dispatcher>,
    limits: HandlerLimits,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match read_request(&mut stream, limits).await {
        Ok(payload) => {
            trace!(size = payload.len(), "Request received");
            isolate(respond(payload, dispatcher)).await
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            debug!("Timed out waiting for request");
            Response::error("Timed out waiting for request")
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request");
            Response::error(format!("Failed to read request: {e}"))
        }
    };

    trace!(error = response.is_error(), "Sending response");
    send_response(&mut stream, &response).await
}

/// Write one response and close the stream.
pub async fn send_response<S>(stream: &mut S, response: &Response) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&response.encode()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

async fn read_request<S>(stream: &mut S, limits: HandlerLimits) -> io::Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(limits.max_request_size);
    let mut limited = stream.take(limits.max_request_size as u64);

    match tokio::time::timeout(limits.read_timeout, limited.read_buf(&mut buffer)).await {
        Ok(result) => {
            result?;
            Ok(buffer.freeze())
        }
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
    }
}

/// Answer a decoded payload with either discovery data or a command result.
async fn respond(payload: Bytes, dispatcher: Arc<Dispatcher>) -> Response {
    match protocol::parse(&payload) {
        Ok(Frame::Discovery) => {
            debug!("Sending command list");
            Response::discovery(COMMANDS)
        }
        Ok(Frame::Command(request)) => Response::from(dispatcher.dispatch(&request).await),
        Err(e) => {
            debug!(error = %e, "Undecodable request");
            Response::error(e.to_string())
        }
    }
}

/// Run `work` on its own task so a panic turns into an error response
/// instead of tearing down the connection without a reply.
async fn isolate<F>(work: F) -> Response
where
    F: Future<Output = Response> + Send + 'static,
{
    match tokio::spawn(work.in_current_span()).await {
        Ok(response) => response,
        Err(e) => {
            let reason = join_error_message(e);
            error!(error = %reason, "Request handler failed");
            Response::error(format!("Failed to handle request: {reason}"))
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
