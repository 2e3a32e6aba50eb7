//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`IdPoolService`), request
//!   accounting, reclaimer supervision and graceful shutdown.

pub mod handler;
