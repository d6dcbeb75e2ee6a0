//! Logging facade
//!
//! The router logs through these crate-internal macros so the backend can be
//! picked with a Cargo feature:
//!
//! - `log` (default) - records go to the `log` crate
//! - `tracing` - records go to `tracing`
//!
//! Every record is emitted under the `navigator_core` target, which makes it
//! easy to filter router noise, e.g. `RUST_LOG=navigator_core=debug`.

macro_rules! trace_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::trace!(target: "navigator_core", $($arg)*);
        #[cfg(feature = "log")]
        ::log::trace!(target: "navigator_core", $($arg)*);
    };
}

macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::debug!(target: "navigator_core", $($arg)*);
        #[cfg(feature = "log")]
        ::log::debug!(target: "navigator_core", $($arg)*);
    };
}

macro_rules! info_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::info!(target: "navigator_core", $($arg)*);
        #[cfg(feature = "log")]
        ::log::info!(target: "navigator_core", $($arg)*);
    };
}

macro_rules! warn_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::warn!(target: "navigator_core", $($arg)*);
        #[cfg(feature = "log")]
        ::log::warn!(target: "navigator_core", $($arg)*);
    };
}

macro_rules! error_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::error!(target: "navigator_core", $($arg)*);
        #[cfg(feature = "log")]
        ::log::error!(target: "navigator_core", $($arg)*);
    };
}

pub(crate) use {debug_log, error_log, info_log, trace_log, warn_log};
