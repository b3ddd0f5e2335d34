//! The hello world responder
//!
//! `GET /` answers `200` with the body [`HELLO_BODY`]. Every other request,
//! including other methods on `/`, answers `404 Not Found`.

use crate::{Method, Request, Response};

/// Body served on `GET /`
pub const HELLO_BODY: &str = "hello world";

/// Maps a request to a response without I/O
///
/// Implemented by [`Responder`] and by any `Fn(&Request) -> Response`, so the
/// server and the test harness can dispatch to either.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, req: &Request) -> Response {
        self(req)
    }
}

/// Stateless single-route responder
#[derive(Debug, Clone, Copy, Default)]
pub struct Responder;

impl Responder {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for Responder {
    fn handle(&self, req: &Request) -> Response {
        match (req.method, req.path.as_str()) {
            (Method::Get, "/") => Response::text(HELLO_BODY),
            _ => Response::not_found(),
        }
    }
}
