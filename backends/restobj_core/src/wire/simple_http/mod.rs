mod body;
mod errors;
mod headers;
mod reader;

pub mod client;

pub use body::*;
pub use errors::*;
pub use headers::*;
pub use reader::*;
