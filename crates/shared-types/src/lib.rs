//! # Shared Types Crate
//!
//! Domain entities and wire payloads exchanged between a verification
//! requestor and its out-of-process verifier workers.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Both sides of the broker encode and decode
//!   with the types defined here.
//! - **Correlation Over Ordering**: Responses carry the request's
//!   `CorrelationId`; queue order is never used for matching.

pub mod entities;
pub mod errors;
pub mod ipc;

pub use entities::*;
pub use errors::*;
pub use ipc::*;
