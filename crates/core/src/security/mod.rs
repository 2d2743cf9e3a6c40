//! Host type access policy.

pub mod gatekeeper;

pub use gatekeeper::{Gatekeeper, TypeVerdict, VerdictReason};
