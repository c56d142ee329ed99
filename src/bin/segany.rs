//! Segment Anything host tool
//!
//! Runs `segany-bridge` on an image and writes every mask as a coloured layer
//! plus a composite preview.

#[cfg(feature = "cli")]
use segany::cli;

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::host::main()
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
