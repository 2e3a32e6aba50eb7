//! Shared definitions for the `idpool` gRPC service.
//!
//! ## Submodules
//!
//! - [`error`] - Service error type and its mapping to [`tonic::Status`].
//! - [`types`] - Manager type aliases and conversions between protobuf
//!   messages and [`idpool`] types.
//! - [`proto`] - Generated messages, client and server stubs.

pub mod error;
pub mod types;

pub use error::{Error, Result};

pub mod proto {
    tonic::include_proto!("idpool");
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("idpool_descriptor");
}
