fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SAFETY: build scripts are single-threaded.
    unsafe { std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?) };

    // Compile proto files for the services ncproxy exposes and talks to:
    // - ncproxy.proto: orchestration-facing NetworkConfigProxy
    // - registration.proto: runtime-facing Registration
    // - nodenetsvc.proto: external NodeNetworkService (client here, server in tests)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/ncproxy.proto",
                "proto/registration.proto",
                "proto/nodenetsvc.proto",
            ],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
