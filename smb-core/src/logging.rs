/// Logging macros used across the workspace.
///
/// With the `tracing` feature these are the `tracing` macros themselves;
/// without it every invocation expands to `()` so call sites need no cfg.

#[cfg(feature = "tracing")]
pub use tracing::{trace, debug, info, warn, error};

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($t:tt)*) => {()};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => {()};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! info {
    ($($t:tt)*) => {()};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => {()};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! error {
    ($($t:tt)*) => {()};
}

#[cfg(not(feature = "tracing"))]
pub use crate::{trace, debug, info, warn, error};
