use std::env;

fn main() {
    println!("cargo:rerun-if-changed=src/kernel/kernel.ld");

    // The linker script only applies to the bare-metal kernel image.
    // Host builds (cargo test) link normally.
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "none" {
        println!("cargo:rustc-link-arg=-Tsrc/kernel/kernel.ld");
    }
}
