//! Process-level tests of the `segany-bridge` binary using its mock runtime

#![cfg(feature = "cli")]

use image::RgbImage;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const BRIDGE: &str = env!("CARGO_BIN_EXE_segany-bridge");

fn bridge(args: &[&str]) -> Output {
    Command::new(BRIDGE)
        .args(["--runtime", "mock"])
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let checkpoint = dir.path().join("sam_vit_b_01ec64.onnx");
    std::fs::write(&checkpoint, b"graph").unwrap();
    let image = dir.path().join("img.png");
    RgbImage::new(50, 50).save(&image).unwrap();
    (dir, checkpoint, image)
}

#[test]
fn self_test_prints_success() {
    let (_dir, checkpoint, _) = setup();
    let output = bridge(&["auto", checkpoint.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "Success!!");
}

#[test]
fn box_run_prints_done_and_writes_one_file() {
    let (dir, checkpoint, image) = setup();
    let stem = dir.path().join("__seg__mask__");
    let stem = stem.to_str().unwrap();

    let output = bridge(&[
        "auto",
        checkpoint.to_str().unwrap(),
        image.to_str().unwrap(),
        "Box",
        "Single",
        stem,
        "True",
        "sel_place_holder",
        "10,10,20,20",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output), "Done!");
    assert!(PathBuf::from(format!("{stem}0.seg")).exists());
    assert!(!PathBuf::from(format!("{stem}1.seg")).exists());
}

#[test]
fn unknown_mode_still_exits_zero() {
    let (dir, checkpoint, image) = setup();
    let stem = dir.path().join("m_");
    let output = bridge(&[
        "auto",
        checkpoint.to_str().unwrap(),
        image.to_str().unwrap(),
        "Lasso",
        "Single",
        stem.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "Done!");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Lasso"));
}

#[test]
fn usage_and_runtime_errors_exit_non_zero() {
    let (_dir, checkpoint, image) = setup();

    let output = bridge(&["auto", checkpoint.to_str().unwrap(), image.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).starts_with("Failed: Usage error"));

    let output = bridge(&["auto", "/nonexistent/sam_vit_b_01ec64.onnx"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).starts_with("Failed: Checkpoint file not found"));
}
