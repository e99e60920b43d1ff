fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/calculator.proto");
    tonic_build::compile_protos("proto/calculator.proto")?;
    Ok(())
}
