//! In-process test harness
//!
//! [`TestClient`] speaks real HTTP/1.1 to a [`Handler`] over a
//! `tokio::io::duplex` pipe. The server half runs the same connection code
//! as [`Server`](crate::Server); no socket is bound.
//!
//! ```no_run
//! # async fn run() -> hello_core::Result<()> {
//! use hello_core::{Responder, TestClient};
//!
//! TestClient::new(Responder::new())
//!     .get("/")
//!     .await?
//!     .expect_status(200)
//!     .expect_body("hello world");
//! # Ok(())
//! # }
//! ```

use crate::server::serve_connection;
use crate::{Error, Handler, Method, Request, RequestBuilder, Response, Result, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single request/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each direction of the in-process pipe
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Dispatches requests to a handler through the in-process transport
pub struct TestClient<H> {
    handler: Arc<H>,
    timeout: Duration,
}

impl<H: Handler> TestClient<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound each exchange by `timeout` instead of [`DEFAULT_TIMEOUT`]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `GET uri`
    pub async fn get(&self, uri: &str) -> Result<TestResponse> {
        self.request(Method::Get, uri).await
    }

    /// Send an empty-bodied request
    pub async fn request(&self, method: Method, uri: &str) -> Result<TestResponse> {
        self.send(RequestBuilder::from_uri(method, uri).build()).await
    }

    /// Send `request` and wait for the full response
    pub async fn send(&self, request: Request) -> Result<TestResponse> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    async fn exchange(&self, request: Request) -> Result<TestResponse> {
        let (client_io, server_io) = tokio::io::duplex(DUPLEX_BUFFER);

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let io = TokioIo::new(server_io);
            if let Err(e) = serve_connection(io, handler, std::future::pending()).await {
                tracing::debug!(error = %e, "in-process server connection error");
            }
        });

        let (mut sender, conn) = http1::handshake(TokioIo::new(client_io)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "in-process client connection error");
            }
        });

        let mut builder = hyper::Request::builder()
            .method(request.method.as_str())
            .uri(request.uri());
        if request.header("host").is_none() {
            builder = builder.header("host", "localhost");
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let res = sender.send_request(builder.body(Full::new(request.body))?).await?;
        let (parts, body) = res.into_parts();

        let mut response = Response::new(StatusCode(parts.status.as_u16()));
        for (name, value) in &parts.headers {
            let value = value
                .to_str()
                .map_err(|_| Error::InvalidHeader(name.to_string()))?;
            response.headers.push((name.to_string(), value.to_string()));
        }
        response.body = body.collect().await?.to_bytes();

        Ok(TestResponse { response })
    }
}

/// Response received by [`TestClient`], with assertion helpers
///
/// The `expect_*` methods panic with expected and actual values on mismatch.
#[derive(Debug, Clone)]
pub struct TestResponse {
    response: Response,
}

impl TestResponse {
    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.response.body).into_owned()
    }

    #[track_caller]
    pub fn expect_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.response.status.as_u16(),
            expected,
            "unexpected status (body: {:?})",
            self.text()
        );
        self
    }

    #[track_caller]
    pub fn expect_body(&self, expected: &str) -> &Self {
        assert_eq!(self.text(), expected, "response body mismatch");
        self
    }

    #[track_caller]
    pub fn expect_header(&self, name: &str, expected: &str) -> &Self {
        assert_eq!(
            self.response.header(name),
            Some(expected),
            "response header {name:?} mismatch"
        );
        self
    }
}

impl Deref for TestResponse {
    type Target = Response;

    fn deref(&self) -> &Response {
        &self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Responder, HELLO_BODY};

    #[tokio::test]
    async fn test_get_root() {
        TestClient::new(Responder::new())
            .get("/")
            .await
            .unwrap()
            .expect_status(200)
            .expect_body(HELLO_BODY)
            .expect_header("content-type", "text/plain; charset=utf-8")
            .expect_header("content-length", "11");
    }

    #[tokio::test]
    async fn test_request_headers_and_body_reach_handler() {
        let client = TestClient::new(|req: &Request| {
            let greeting = req.header("x-greeting").unwrap_or("none").to_string();
            let body = String::from_utf8_lossy(&req.body).into_owned();
            Response::text(format!("{} {} {}", req.method, greeting, body))
        });

        let request = RequestBuilder::new(Method::Post, "/echo")
            .header("x-greeting", "hi")
            .body("payload")
            .build();
        let res = client.send(request).await.unwrap();
        res.expect_status(200).expect_body("POST hi payload");
    }

    #[tokio::test]
    async fn test_query_reaches_handler() {
        let client = TestClient::new(|req: &Request| {
            Response::text(req.query.clone().unwrap_or_default())
        });
        client.get("/?a=1&b=2").await.unwrap().expect_body("a=1&b=2");
    }

    #[tokio::test]
    #[should_panic(expected = "response body mismatch")]
    async fn test_expect_body_reports_mismatch() {
        TestClient::new(Responder::new())
            .get("/missing")
            .await
            .unwrap()
            .expect_body(HELLO_BODY);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_handler_times_out() {
        let client = TestClient::new(|_: &Request| {
            std::thread::sleep(Duration::from_millis(500));
            Response::text("late")
        })
        .timeout(Duration::from_millis(50));

        let err = client.get("/").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(50)));
    }
}
