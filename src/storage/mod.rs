//! Cache node backends.
//!
//! - [`memory`]: in-process node (tests, single-process deployments)
//! - [`redis`]: Redis node

pub mod traits;
pub mod memory;
pub mod redis;
