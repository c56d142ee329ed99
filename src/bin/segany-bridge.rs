//! Segment Anything bridge process
//!
//! Loads a SAM1 or SAM2 checkpoint, runs one segmentation call and writes the
//! resulting masks as `<stem><index>.seg` files.

#[cfg(feature = "cli")]
use segany::cli;

#[cfg(feature = "cli")]
fn main() {
    std::process::exit(cli::bridge::main());
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
