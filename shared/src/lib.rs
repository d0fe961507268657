//! Shared types for the print station
//!
//! Order payloads as they arrive from upstream services, and the canonical
//! order model the receipt renderer consumes.

pub mod models;

// Re-exports
pub use models::{Order, OrderItem, OrderItemPayload, OrderPayload, Scalar};
pub use serde::{Deserialize, Serialize};
