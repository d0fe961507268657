//! Data models
//!
//! `*Payload` types mirror the loosely-typed JSON produced upstream.
//! Everything downstream works on the normalized types.

pub mod order;

// Re-exports
pub use order::*;
