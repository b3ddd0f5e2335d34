//! Native HTTP server implementation
//!
//! Serves a [`Handler`] over HTTP/1.1 using hyper with:
//! - One tokio task per connection
//! - SO_REUSEPORT / TCP_NODELAY listener sockets
//! - Graceful shutdown that drains open connections

use crate::{Error, Handler, Method, Request, Response, Result, ServerConfig};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Listen backlog for server sockets
const BACKLOG: i32 = 1024;

/// Largest request body buffered before the handler runs
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Create a TCP socket with optimizations
pub fn create_optimized_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - enable kernel load balancing across processes
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    // TCP_NODELAY - disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(BACKLOG)?;

    Ok(socket)
}

/// Create a tokio listener on `addr`. Must be called inside a tokio runtime.
pub fn create_listener(addr: &SocketAddr) -> std::io::Result<TcpListener> {
    let socket = create_optimized_socket(addr)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// Collect `body`, failing with `BodyTooLarge` once it exceeds `limit` bytes
///
/// A declared length above the limit fails before any data is read.
pub async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if body.size_hint().lower() > limit as u64 {
        return Err(Error::BodyTooLarge { limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(Error::BodyTooLarge { limit }),
        Err(e) => match e.downcast::<hyper::Error>() {
            Ok(e) => Err(Error::Hyper(*e)),
            Err(e) => Err(Error::Internal(e.to_string())),
        },
    }
}

/// Convert a hyper request to our Request type, collecting the body
///
/// Header values that are not visible ASCII are skipped.
pub async fn read_request(req: hyper::Request<Incoming>) -> Result<Request> {
    let (parts, body) = req.into_parts();

    let method = Method::parse(parts.method.as_str().as_bytes())
        .ok_or_else(|| Error::InvalidMethod(parts.method.to_string()))?;

    let mut request = Request::new(method, parts.uri.path());
    request.query = parts.uri.query().map(|s| s.to_string());

    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(v) => request.headers.push((name.to_string(), v.to_string())),
            Err(_) => tracing::debug!(header = %name, "skipping non-ASCII header value"),
        }
    }

    request.body = read_body(body, MAX_BODY_SIZE).await?;
    Ok(request)
}

/// Convert our Response to hyper Response
pub fn to_hyper_response(res: Response) -> Result<hyper::Response<Full<Bytes>>> {
    let mut builder = hyper::Response::builder().status(res.status.as_u16());

    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    Ok(builder.body(Full::new(res.body))?)
}

fn fallback_internal_error() -> hyper::Response<Full<Bytes>> {
    let mut res = hyper::Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *res.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
    res
}

/// Run one hyper request through `handler`
///
/// Unsupported methods answer 404 like any other unmatched request,
/// oversized bodies 413, other unreadable requests 400.
pub async fn dispatch<H>(handler: &H, req: hyper::Request<Incoming>) -> hyper::Response<Full<Bytes>>
where
    H: Handler + ?Sized,
{
    let started = Instant::now();
    let response = match read_request(req).await {
        Ok(request) => {
            let response = handler.handle(&request);
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                status = response.status.as_u16(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "handled request"
            );
            response
        }
        Err(Error::InvalidMethod(method)) => {
            tracing::debug!(%method, "unsupported method");
            Response::not_found()
        }
        Err(e @ Error::BodyTooLarge { .. }) => {
            tracing::debug!(error = %e, "rejecting request body");
            Response::payload_too_large(&e.to_string())
        }
        Err(Error::Internal(message)) => {
            tracing::error!(%message, "failed to read request");
            Response::internal_error(&message)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request");
            Response::bad_request(&e.to_string())
        }
    };

    to_hyper_response(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build response");
        fallback_internal_error()
    })
}

/// Serve HTTP/1.1 on `io` until the peer closes or `shutdown` resolves
///
/// On shutdown the in-flight request completes and the connection closes.
pub async fn serve_connection<I, H, S>(io: I, handler: Arc<H>, shutdown: S) -> Result<()>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    H: Handler,
    S: Future<Output = ()>,
{
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(dispatch(handler.as_ref(), req).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);
    tokio::pin!(shutdown);

    tokio::select! {
        res = conn.as_mut() => res?,
        _ = &mut shutdown => {
            conn.as_mut().graceful_shutdown();
            conn.await?;
        }
    }

    Ok(())
}

// ============================================================================
// Connection Tracking for Graceful Shutdown
// ============================================================================

/// Tracks active connections for graceful shutdown
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    /// Active connection count
    active: AtomicU64,
    /// Shutdown signal received
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    /// Create a new connection tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection as active until the returned guard drops
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Get current active connection count
    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal that shutdown is in progress
    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown is in progress
    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Wait for active connections to drain
    ///
    /// Returns true if all connections drained, false if `timeout` elapsed.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.count() == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Decrements the active count of its [`ConnectionTracker`] on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Bound HTTP/1.1 server for a single handler
pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    tracker: Arc<ConnectionTracker>,
    shutdown_timeout: Duration,
}

impl<H: Handler> Server<H> {
    /// Bind the listener described by `config`
    pub async fn bind(handler: H, config: &ServerConfig) -> Result<Self> {
        let addr = config.addr()?;
        let listener = create_listener(&addr)?;
        tracing::info!(addr = %listener.local_addr()?, "listening");

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            tracker: Arc::new(ConnectionTracker::new()),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Address the listener is bound to (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connection tracker shared with every connection task
    pub fn tracker(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Accept connections until `shutdown` resolves, then drain
    ///
    /// Returns true if every open connection closed within the configured
    /// shutdown timeout.
    pub async fn serve<F>(self, shutdown: F) -> Result<bool>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            handler,
            tracker,
            shutdown_timeout,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }

                    let handler = Arc::clone(&handler);
                    let guard = tracker.track();
                    let mut stop_rx = stop_rx.clone();

                    tokio::spawn(async move {
                        let stop = async move {
                            let _ = stop_rx.wait_for(|stopping| *stopping).await;
                        };
                        if let Err(e) = serve_connection(TokioIo::new(stream), handler, stop).await {
                            tracing::debug!(%peer, error = %e, "connection error");
                        }
                        drop(guard);
                    });
                }
                _ = &mut shutdown => break,
            }
        }

        tracker.start_shutdown();
        drop(listener);
        tracing::info!(active = tracker.count(), "shutting down");

        let _ = stop_tx.send(true);
        let drained = tracker.wait_idle(shutdown_timeout).await;
        if drained {
            tracing::info!("all connections closed");
        } else {
            tracing::warn!(
                active = tracker.count(),
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "shutdown timeout reached with open connections"
            );
        }

        Ok(drained)
    }
}
