//! TCP server with admission control.
//!
//! The acceptor owns the set of running handlers. Each accepted connection
//! either gets a handler permit and its own task, or is answered with a busy
//! error and closed straight away. Nothing is queued.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::handler::{self, HandlerLimits};
use crate::protocol::Response;
use crate::quarantine::Quarantine;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How often the accept loop wakes up without a connection
const ACCEPT_TICK: Duration = Duration::from_secs(1);

/// Upper bound on writing the busy rejection
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server instance
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    handler_limit: Arc<Semaphore>,
    max_handlers: usize,
    limits: HandlerLimits,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: Config) -> io::Result<Self> {
        let listen = config.listen_addr();
        let addr = tokio::net::lookup_host(listen.as_str()).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {listen}"),
            )
        })?;

        let listener = TcpListener::from_std(create_listener(addr, config.backlog)?)?;
        info!(
            address = %listener.local_addr()?,
            max_handlers = config.max_handlers,
            quarantine_dir = %config.quarantine_dir.display(),
            "Server listening"
        );

        Ok(Server {
            listener,
            dispatcher: Arc::new(Dispatcher::new(Quarantine::new(config.quarantine_dir))),
            handler_limit: Arc::new(Semaphore::new(config.max_handlers)),
            max_handlers: config.max_handlers,
            limits: HandlerLimits {
                max_request_size: config.max_request_size,
                read_timeout: config.read_timeout,
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled, then wait for every
    /// running handler to finish.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let Server {
            listener,
            dispatcher,
            handler_limit,
            max_handlers,
            limits,
        } = self;

        let mut handlers = JoinSet::new();
        let mut tick = tokio::time::interval(ACCEPT_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = tick.tick() => reap(&mut handlers),

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        reap(&mut handlers);

                        let permit = match Arc::clone(&handler_limit).try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!(peer = %peer, max_handlers, "Server is busy, rejecting connection");
                                reject(stream).await;
                                continue;
                            }
                        };

                        let dispatcher = Arc::clone(&dispatcher);
                        handlers.spawn(
                            async move {
                                info!("New connection");
                                if let Err(e) = handler::handle_connection(stream, dispatcher, limits).await {
                                    debug!(error = %e, "Connection error");
                                }
                                drop(permit);
                            }
                            .instrument(info_span!("connection", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(listener);
        info!(active = handlers.len(), "Server stopping, draining handlers");

        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                log_handler_failure(e);
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Drop finished handlers from the active set
fn reap(handlers: &mut JoinSet<()>) {
    while let Some(result) = handlers.try_join_next() {
        if let Err(e) = result {
            log_handler_failure(e);
        }
    }
}

fn log_handler_failure(err: JoinError) {
    if err.is_panic() {
        error!(error = %err, "Connection handler panicked");
    } else {
        debug!(error = %err, "Connection handler cancelled");
    }
}

/// Answer an over-capacity connection with the busy error and close it.
async fn reject(mut stream: TcpStream) {
    let busy = Response::busy();
    let write = handler::send_response(&mut stream, &busy);
    match tokio::time::timeout(REJECT_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to send busy response"),
        Err(_) => debug!("Timed out sending busy response"),
    }
}

fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}
