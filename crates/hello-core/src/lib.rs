//! hello-core: single-route HTTP responder
//!
//! `GET /` answers `200 hello world`; everything else answers `404`.
//! The responder is a pure function from [`Request`] to [`Response`], so
//! it can be served over TCP or dispatched in-process by the test harness.
//!
//! ## Features
//! - `native` - Native server and test harness with tokio/hyper (default)

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod request;
pub mod responder;
pub mod response;

#[cfg(feature = "native")]
pub mod config;

#[cfg(feature = "native")]
pub mod server;

#[cfg(feature = "native")]
pub mod testing;

// Re-exports
pub use error::{Error, Result};
pub use request::{Method, Request, RequestBuilder};
pub use responder::{Handler, Responder, HELLO_BODY};
pub use response::{Response, ResponseBuilder, StatusCode, TEXT_PLAIN};

#[cfg(feature = "native")]
pub use config::ServerConfig;

#[cfg(feature = "native")]
pub use server::{ConnectionGuard, ConnectionTracker, Server};

#[cfg(feature = "native")]
pub use testing::{TestClient, TestResponse};
