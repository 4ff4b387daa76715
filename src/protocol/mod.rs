//! Wire protocol layer: frame codec, error taxonomy and the
//! authenticated request/acknowledge exchange over a single connection.
//!
//! Everything in this module speaks [`ProtocolError`] and stays decoupled
//! from the crate-level error domain; `supervisor` provides the mapping.
//!
//! [`ProtocolError`]: error::ProtocolError

pub mod error;
pub mod frame;
pub mod session;
