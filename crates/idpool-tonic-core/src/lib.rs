#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can access `idpool` via
// `idpool_tonic_core::idpool`
pub use idpool;
