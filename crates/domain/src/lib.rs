//! Domain-level building blocks shared across the API, gateway and provider
//! crates: invite-code and order types, the payment signature scheme, the
//! storage trait contracts and the telemetry/configuration plumbing every
//! binary reuses.

pub mod config;
pub mod model;
pub mod services;
pub mod sign;
pub mod storage;

pub use model::*;
pub use storage::*;
