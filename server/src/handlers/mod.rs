//! Request handlers for sync runs.

mod sync;

pub use sync::*;
