//! Test tooling for the curl client workspace.
//!
//! This crate provides a small HTTP/1.1 server on localhost that records the
//! requests it receives, so integration tests can drive the real libcurl
//! engine end to end.
//!
//! # Examples
//!
//! ```rust
//! use foundation_testing::http::TestHttpServer;
//!
//! let server = TestHttpServer::start();
//! assert!(server.url("/ping").ends_with("/ping"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod http;
