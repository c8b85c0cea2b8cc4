pub mod simple_http;
