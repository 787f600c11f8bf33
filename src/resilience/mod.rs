//! Retry helpers for connection setup.

pub mod retry;
