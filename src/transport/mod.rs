//! Transport layer
//!
//! Byte movement between the client side and outbound connections.

pub mod relay;

pub use relay::{relay, Traffic};
