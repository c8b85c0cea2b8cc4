mod core;
mod same;

pub use self::core::*;
pub use same::*;
