fn main() {
    let proto_file = "proto/sessionstatus.proto";
    println!("cargo:rerun-if-changed={proto_file}");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto_file], &["proto"])
        .expect("session status proto compilation must succeed");
}
