fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SAFETY: build scripts are single-threaded.
    unsafe { std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?) };

    // The broker dials agents, the runtime serves them.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/computeagent.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/computeagent.proto");
    Ok(())
}
