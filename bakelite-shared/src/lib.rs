//! Types shared across the bakelite engine crates.

pub mod errors;

pub use errors::{BakeliteError, BakeliteResult};
