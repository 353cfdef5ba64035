//! Command implementations.
//!
//! Camera workflows share one session setup; completions never touch the port.

pub(crate) mod camera;
pub(crate) mod completions;
