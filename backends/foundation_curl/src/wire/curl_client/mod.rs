// Curl Client Module
//
// This module provides an id-addressed, polled HTTP client layered over a
// pluggable multiplexing transport engine (libcurl's multi interface by default).

mod certificate;
mod client;
mod drain;
mod engine;
mod errors;
mod exchange;
mod mock_engine;
mod registry;
mod request;
mod response;

#[cfg(feature = "engine-curl")]
mod curl_engine;

pub use certificate::*;
pub use client::*;
pub use drain::*;
pub use engine::*;
pub use errors::*;
pub use exchange::*;
pub use mock_engine::*;
pub use registry::*;
pub use request::*;
pub use response::*;

#[cfg(feature = "engine-curl")]
pub use curl_engine::*;
