//! HTTP test server utilities.
//!
//! WHY: Client tests need a real peer speaking HTTP/1.1 on a real socket.
//!
//! WHAT: `TestHttpServer`, which answers through a caller-supplied handler
//! and keeps a log of every request it parsed.
//!
//! HOW: stdlib `TcpListener` and threads, with a minimal request parser that
//! understands the request line, headers and a `Content-Length` body.

mod server;

pub use server::{HttpRequest, HttpResponse, TestHttpServer};
