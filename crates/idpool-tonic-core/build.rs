/// Builds the gRPC client and server code for `proto/idpool.proto` with
/// `tonic-prost-build`.
///
/// Besides the message types and service traits, a serialized
/// `FileDescriptorSet` is written to `OUT_DIR` so the server can register it
/// with `tonic-reflection`.
///
/// # Output
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("idpool");
///     pub const FILE_DESCRIPTOR_SET: &[u8] =
///         tonic::include_file_descriptor_set!("idpool_descriptor");
/// }
/// ```
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("idpool_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/idpool.proto"], &["proto"])
        .unwrap();
}
