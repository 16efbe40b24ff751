//! Async HTTP/1.1 front end on Tokio.
//!
//! Each accepted connection runs in its own task and may carry several
//! requests (keep-alive). Every request is dispatched through the
//! [`Router`] with a child of the server's shutdown token, so cache reads
//! in flight observe shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Requests larger than this are answered with `413` (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use apigate::{Router, server::Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Arc::new(Router::new());
///     Server::bind("127.0.0.1:8080").await?.serve(router).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the process exits.
    pub async fn serve(self, router: Arc<Router>) -> Result<(), ServerError> {
        self.serve_with_shutdown(router, CancellationToken::new())
            .await
    }

    /// Serves until `shutdown` is cancelled. Cancelling also trips the
    /// per-request tokens of requests still in flight.
    pub async fn serve_with_shutdown(
        self,
        router: Arc<Router>,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "apigate listening");

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("shutdown requested; no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router, shutdown).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What the buffered bytes amount to so far.
enum Framed {
    Ready(Request, usize),
    NeedMore,
    Rejected(Response),
}

fn too_large() -> Framed {
    Framed::Rejected(Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"))
}

fn frame(buf: &[u8]) -> Framed {
    if buf.len() > MAX_REQUEST_SIZE {
        return too_large();
    }
    match Request::parse(buf) {
        Ok((request, body_offset)) => {
            let end = body_offset.checked_add(request.content_length().unwrap_or(0));
            match end {
                Some(end) if end > MAX_REQUEST_SIZE => too_large(),
                None => too_large(),
                Some(end) if buf.len() < end => Framed::NeedMore,
                Some(end) => Framed::Ready(request, end),
            }
        }
        Err(RequestError::Incomplete) => Framed::NeedMore,
        Err(e) => Framed::Rejected(
            Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
        ),
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, consumed) = match frame(&buf) {
            Framed::Ready(request, consumed) => (request, consumed),
            Framed::Rejected(response) => {
                warn!(peer = %peer_addr, status = %response.status(), "rejecting request");
                stream.write_all(&response.keep_alive(false).into_bytes()).await?;
                return Ok(());
            }
            Framed::NeedMore => {
                let read = tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    read = stream.read_buf(&mut buf) => read?,
                };
                if read == 0 {
                    debug!(peer = %peer_addr, "peer closed the connection");
                    return Ok(());
                }
                continue;
            }
        };
        let _ = buf.split_to(consumed);

        let keep_alive = request.is_keep_alive();
        let head = *request.method() == Method::Head;
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = request.path(),
            "request"
        );

        let mut response = router.dispatch(request, shutdown.child_token()).await;
        if head {
            response = response.head_only();
        }
        if !keep_alive {
            response = response.keep_alive(false);
        }
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            return Ok(());
        }
    }
}
