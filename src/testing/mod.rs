//! Test doubles
//!
//! A scriptable in-memory broker implementing the broker contract, so the
//! loops can be exercised without an external broker.

mod fake;

pub use fake::FakeBroker;
