//! The orchestrator between proxies and the wire.
//!
//! [`HttpClient`] normalizes URIs against its [`BaseUri`], runs requests
//! through the transport, classifies statuses with its [`ErrorTable`],
//! follows redirects (remembering 301s in its [`RedirectTable`]) and hands
//! parsed documents to its [`InstanceCache`].

mod cache;
mod client;
mod normalize;
mod status;

pub use cache::*;
pub use client::*;
pub use normalize::*;
pub use status::*;

pub(crate) use client::WeakClient;
