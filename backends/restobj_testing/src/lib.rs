//! Test infrastructure for restobj clients.
//!
//! - [`http::TestHttpServer`]: a keep-alive HTTP/1.1 server on localhost
//!   that records every request it serves.
//! - [`fixture::FixtureApi`]: an in-memory document API with collections,
//!   paging, redirects and raw content, served by
//!   [`fixture::FixtureServer`].

#![allow(clippy::module_name_repetitions)]

pub mod fixture;
pub mod http;

pub use fixture::{FixtureApi, FixtureServer};
pub use http::{HttpResponse, TestHttpServer};
