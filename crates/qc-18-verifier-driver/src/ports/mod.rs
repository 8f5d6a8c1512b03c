//! # Ports Layer
//!
//! - **Inbound (Driving)**: the API callers use to submit verifications
//! - **Outbound (Driven)**: the broker, expressed by
//!   [`shared_bus::BrokerSession`]

pub mod inbound;

pub use inbound::VerificationApi;
