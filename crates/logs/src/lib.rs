//! Logging macros that keep tracing calls out of builds which do not enable
//! the matching `log_*` feature on the calling crate.
//! See similar: https://doc.rust-lang.org/src/std/macros.rs.html#138-145.

/// Tracing target used for request/response wire traffic.
pub const TRAFFIC_TARGET: &str = "restobj::traffic";

#[macro_export]
macro_rules! info {
    ($($t:tt)*) => {
        if cfg!(feature="log_info") {
            tracing::info!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => {
        if cfg!(feature="log_warnings") {
            tracing::warn!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => {
        if cfg!(feature="log_debug") {
            tracing::debug!($($t)*);
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($t:tt)*) => {
        if cfg!(feature="log_errors") {
            tracing::error!($($t)*);
        }
    };
}

/// Logs one line of wire traffic under [`TRAFFIC_TARGET`].
#[macro_export]
macro_rules! traffic {
    ($($t:tt)*) => {
        if cfg!(feature="log_debug") {
            tracing::debug!(target: "restobj::traffic", $($t)*);
        }
    };
}

/// Installs a plain fmt subscriber at the given level.
///
/// Returns false when a global subscriber was already installed, which
/// makes repeated calls harmless.
pub fn setup_logging(level: tracing::Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
