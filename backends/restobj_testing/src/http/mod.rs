//! HTTP test server utilities.
//!
//! WHY: Clients under test need a real HTTP/1.1 peer on a real socket.
//!
//! WHAT: `TestHttpServer` for integration testing HTTP clients.
//!
//! HOW: Uses stdlib's `TcpListener` with a thread per connection, parsing
//! requests with the client's own wire reader.

mod server;

pub use server::{reason_phrase, HttpResponse, TestHttpServer};
