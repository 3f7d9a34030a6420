//! CLI integration tests for rostro-cli.
//!
//! These tests run the actual binary against a temporary data directory
//! with the mock embedding provider, and check outputs, exit codes and
//! file artifacts.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;

/// Command for the rostro binary, isolated from the caller's environment.
fn rostro(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rostro").unwrap();
    cmd.env_remove("ROSTRO_PROVIDER_URL")
        .env_remove("ROSTRO_OBJECT_PROVIDER_URL")
        .env_remove("ROSTRO_CATALOG_PATH")
        .env_remove("ROSTRO_REFERENCE_DIR")
        .env_remove("ROSTRO_DETECTED_DIR")
        .env_remove("ROSTRO_ANALYZE_DIR")
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--mock");
    cmd
}

fn write_portrait(path: &Path, seed: u8) {
    RgbImage::from_fn(40, 30, |x, y| Rgb([(x as u8).wrapping_mul(seed), y as u8, seed]))
        .save(path)
        .unwrap();
}

fn write_blank(path: &Path) {
    RgbImage::from_pixel(40, 30, Rgb([90, 90, 90])).save(path).unwrap();
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.arg("--json").output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    Command::cargo_bin("rostro")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Face identity resolution"))
        .stdout(predicate::str::contains("detect-image"))
        .stdout(predicate::str::contains("detect-video"))
        .stdout(predicate::str::contains("enroll"));
}

#[test]
fn test_help_shows_exit_codes() {
    Command::cargo_bin("rostro")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"))
        .stdout(predicate::str::contains("66"));
}

#[test]
fn test_detect_video_help_shows_options() {
    Command::cargo_bin("rostro")
        .unwrap()
        .args(["detect-video", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--frame-skip"))
        .stdout(predicate::str::contains("--downscale"))
        .stdout(predicate::str::contains("--live"));
}

#[test]
fn test_missing_subcommand_is_usage_error() {
    Command::cargo_bin("rostro").unwrap().assert().code(2);
}

// ============================================================================
// Individual Management
// ============================================================================

#[test]
fn test_create_and_list() {
    let temp = TempDir::new().unwrap();

    rostro(temp.path())
        .args(["create", "Ana", "--first-surname", "Garcia"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"))
        .stdout(predicate::str::contains("Ana Garcia"));

    assert!(temp.path().join("catalog.json").exists());

    rostro(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ana Garcia"))
        .stdout(predicate::str::contains("0 faces"));
}

#[test]
fn test_list_empty_catalog() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No individuals registered"));
}

#[test]
fn test_create_json_output() {
    let temp = TempDir::new().unwrap();
    let created = json_stdout(rostro(temp.path()).args([
        "create",
        "Luis",
        "--first-surname",
        "Perez",
        "--second-surname",
        "Soto",
    ]));

    assert_eq!(created["given_name"], "Luis");
    assert_eq!(created["display_name"], "Luis_Perez");
    assert!(created["id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[test]
fn test_show_unknown_individual_returns_input_error() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["show", "nobody"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("nobody"));
}

#[test]
fn test_create_with_empty_name_is_usage_error() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["create", "  "])
        .assert()
        .code(64);
}

#[test]
fn test_update_replaces_names() {
    let temp = TempDir::new().unwrap();
    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap();

    rostro(temp.path())
        .args(["update", id, "Ana", "--first-surname", "Ruiz"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated"));

    let shown = json_stdout(rostro(temp.path()).args(["show", id]));
    assert_eq!(shown["first_surname"], "Ruiz");
    assert_eq!(shown["display_name"], "Ana_Ruiz");
}

#[test]
fn test_delete_removes_individual() {
    let temp = TempDir::new().unwrap();
    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap();

    rostro(temp.path())
        .args(["delete", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));

    rostro(temp.path()).args(["show", id]).assert().code(66);
}

// ============================================================================
// Reference Faces
// ============================================================================

#[test]
fn test_enroll_stores_reference_file() {
    let temp = TempDir::new().unwrap();
    let portrait = temp.path().join("ana.png");
    write_portrait(&portrait, 3);

    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap().to_string();

    let face = json_stdout(
        rostro(temp.path())
            .args(["enroll", &id])
            .arg(&portrait),
    );
    let stored = Path::new(face["path"].as_str().unwrap());
    assert!(stored.exists());
    assert!(stored
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&format!("{id}___")));

    let shown = json_stdout(rostro(temp.path()).args(["show", &id]));
    assert_eq!(shown["references"].as_array().unwrap().len(), 1);
}

#[test]
fn test_enroll_rejects_image_without_face() {
    let temp = TempDir::new().unwrap();
    let blank = temp.path().join("wall.png");
    write_blank(&blank);

    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap();

    rostro(temp.path())
        .args(["enroll", id])
        .arg(&blank)
        .assert()
        .code(65)
        .stderr(predicate::str::contains("found 0"));

    let reference_dir = temp.path().join("imagenes/referencia");
    let stored = fs::read_dir(&reference_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(stored, 0);
}

#[test]
fn test_create_with_rejected_reference_rolls_back() {
    let temp = TempDir::new().unwrap();
    let blank = temp.path().join("wall.png");
    write_blank(&blank);

    rostro(temp.path())
        .args(["create", "Ana", "--reference"])
        .arg(&blank)
        .assert()
        .code(65);

    rostro(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No individuals registered"));
}

#[test]
fn test_enroll_missing_file_returns_input_error() {
    let temp = TempDir::new().unwrap();
    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap();

    rostro(temp.path())
        .args(["enroll", id, "nonexistent_file.jpg"])
        .assert()
        .code(66);
}

#[test]
fn test_remove_face_unknown_face_returns_input_error() {
    let temp = TempDir::new().unwrap();
    let created = json_stdout(rostro(temp.path()).args(["create", "Ana"]));
    let id = created["id"].as_str().unwrap();

    rostro(temp.path())
        .args(["remove-face", id, "missing"])
        .assert()
        .code(66);
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_detect_image_missing_file_returns_input_error() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["detect-image", "nonexistent_file.jpg"])
        .assert()
        .code(66);
}

#[test]
fn test_detect_image_without_references_reports_unknown() {
    let temp = TempDir::new().unwrap();
    let photo = temp.path().join("photo.png");
    write_portrait(&photo, 5);

    let report = json_stdout(rostro(temp.path()).arg("detect-image").arg(&photo));
    let faces = report["faces"].as_array().unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0]["name"], "Desconocido");
    assert!(faces[0]["individual_id"].is_null());
    assert!(report["objects"].as_array().unwrap().is_empty());
}

#[test]
fn test_detect_image_uses_analyze_dir_for_relative_names() {
    let temp = TempDir::new().unwrap();
    let analyze_dir = temp.path().join("imagenes/analizar");
    fs::create_dir_all(&analyze_dir).unwrap();
    write_portrait(&analyze_dir.join("staged_photo.png"), 7);

    let report = json_stdout(rostro(temp.path()).args(["detect-image", "staged_photo.png"]));
    assert_eq!(report["faces"].as_array().unwrap().len(), 1);
    assert!(temp
        .path()
        .join("imagenes/detectadas/staged_photo.png")
        .exists());
}

#[test]
fn test_detect_image_no_save_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let photo = temp.path().join("photo.png");
    write_portrait(&photo, 5);

    let report = json_stdout(
        rostro(temp.path())
            .arg("detect-image")
            .arg(&photo)
            .arg("--no-save"),
    );
    assert!(report["annotated"].is_null());
    assert!(!temp.path().join("imagenes/detectadas/photo.png").exists());
}

#[test]
fn test_detect_video_rejects_zero_frame_skip() {
    let temp = TempDir::new().unwrap();
    let frames = temp.path().join("frames");
    fs::create_dir_all(&frames).unwrap();

    rostro(temp.path())
        .arg("detect-video")
        .arg(&frames)
        .args(["--frame-skip", "0"])
        .assert()
        .code(64);
}

#[test]
fn test_detect_video_missing_input_returns_input_error() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["detect-video", "no_such_video.mp4"])
        .assert()
        .code(66);
}

#[test]
fn test_invalid_threshold_is_usage_error() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["--threshold=-1", "list"])
        .assert()
        .code(64);
}

#[test]
fn test_quiet_suppresses_output() {
    let temp = TempDir::new().unwrap();
    rostro(temp.path())
        .args(["--quiet", "create", "Ana"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
