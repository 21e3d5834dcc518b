//! Integration tests for the kiln CLI

use kiln_hash::{Algorithm, Digest};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Config file rooting the agent's layout inside `base`
fn write_config(base: &Path) -> PathBuf {
    let path = base.join("config.toml");
    std::fs::write(
        &path,
        format!("[paths]\nbase_dir = {:?}\n", base.display().to_string()),
    )
    .unwrap();
    path
}

fn kiln(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .env_remove("KILN_BASE_DIR")
        .env_remove("KILN_OUTPUT")
        .env_remove("KILN_COMPILE_DIR")
        .env_remove("KILN_BLOBS_DIR")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("Failed to execute kiln")
}

fn plain_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("--version")
        .output()
        .expect("Failed to execute kiln");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kiln"));
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("--help")
        .output()
        .expect("Failed to execute kiln");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("compile"));
    assert!(stdout.contains("sniff"));
    assert!(stdout.contains("reset"));
}

#[test]
fn test_cli_invalid_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("invalid-command")
        .output()
        .expect("Failed to execute kiln");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand"));
}

#[test]
fn test_sniff_reports_format() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let tar_path = temp.path().join("source.tar");
    std::fs::write(&tar_path, plain_tar(&[("hello.txt", b"hello".as_slice())])).unwrap();
    let gzip_path = temp.path().join("source.tgz");
    std::fs::write(&gzip_path, [0x1f, 0x8b, 0x08, 0x00]).unwrap();

    let output = kiln(&config, &["--output", "plain", "sniff", tar_path.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "tar");

    let output = kiln(&config, &["--output", "plain", "sniff", gzip_path.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "gzip");

    let output = kiln(&config, &["--output", "json", "sniff", tar_path.to_str().unwrap()]);
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["uncompressed_tar"], true);
}

#[test]
fn test_compile_from_local_blobstore() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let source = plain_tar(&[("hello.txt", b"hello".as_slice())]);
    let blobs_dir = temp.path().join("data/blobs");
    std::fs::create_dir_all(&blobs_dir).unwrap();
    std::fs::write(blobs_dir.join("source-1"), &source).unwrap();

    let request = temp.path().join("request.json");
    std::fs::write(
        &request,
        serde_json::json!({
            "package": {
                "name": "foo",
                "version": "1",
                "source": {
                    "checksum": Digest::from_data(Algorithm::Sha1, &source).to_string(),
                    "blobstore_id": "source-1",
                },
            },
        })
        .to_string(),
    )
    .unwrap();

    let output = kiln(&config, &["compile", "--request", request.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let blob_id = value["blob_id"].as_str().unwrap();
    assert!(!blob_id.is_empty());
    assert!(!value["digest"].as_str().unwrap().is_empty());

    // A plain tar source stays a plain tar artifact
    let artifact = std::fs::read(blobs_dir.join(blob_id)).unwrap();
    assert_ne!(&artifact[..2], &[0x1f, 0x8b]);
    assert_eq!(&artifact[257..262], b"ustar");

    assert!(!temp.path().join("data/compile/foo").exists());
    assert!(!temp.path().join("packages/foo").exists());
}

#[test]
fn test_compile_without_locator_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let request = temp.path().join("request.json");
    std::fs::write(
        &request,
        serde_json::json!({
            "package": {
                "name": "foo",
                "version": "1",
                "source": { "checksum": Digest::from_data(Algorithm::Sha1, b"x").to_string() },
            },
        })
        .to_string(),
    )
    .unwrap();

    let output = kiln(&config, &["compile", "--request", request.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no blobstore reference for package 'foo'"));
}

#[test]
fn test_malformed_request_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let request = temp.path().join("request.json");
    std::fs::write(&request, "{ not json").unwrap();

    let output = kiln(&config, &["compile", "--request", request.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid compile request"));
}

#[test]
fn test_reset_on_empty_layout() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = kiln(&config, &["--output", "plain", "reset"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Removed every applied package"
    );
}
