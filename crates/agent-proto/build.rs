fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = &["proto/agent.proto"];
    let dirs = &["proto"];

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(proto_files, dirs)?;

    for file in proto_files {
        println!("cargo:rerun-if-changed={file}");
    }

    Ok(())
}
