//! Pooled, threaded HTTP/1.1 transport.
//!
//! A [`TransportClient`] builds [`Request`]s and hands them to a
//! [`RequestDispatcher`], whose [`RequestWorker`]s each own a few
//! [`Connection`]s and settle every request into its response slot.

mod connection;
mod dispatcher;
mod request;
mod transport;
mod worker;

pub use connection::*;
pub use dispatcher::*;
pub use request::*;
pub use transport::*;
pub use worker::*;
