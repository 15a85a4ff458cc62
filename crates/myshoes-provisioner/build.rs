fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/shoes.proto");
    println!("cargo:rerun-if-changed=proto/health.proto");

    // Server stubs are generated too so tests can stand up an in-process plugin.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/shoes.proto", "proto/health.proto"], &["proto"])?;

    Ok(())
}
