//! Build script for generating the record-relay protocol buffer code.

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // Generate descriptors for runtime reflection
        .file_descriptor_set_path(PathBuf::from(env::var("OUT_DIR")?).join("relay_descriptor.bin"))
        // Suppress specific clippy warnings for generated code
        .type_attribute(
            ".",
            "#[allow(clippy::all, clippy::pedantic, clippy::nursery)]",
        )
        .server_attribute(
            ".",
            "#[allow(clippy::all, clippy::pedantic, clippy::nursery)]",
        )
        .client_attribute(
            ".",
            "#[allow(clippy::all, clippy::pedantic, clippy::nursery)]",
        )
        .compile_protos(&[proto_root.join("relay/v1/exporter.proto")], &[proto_root])?;

    Ok(())
}
