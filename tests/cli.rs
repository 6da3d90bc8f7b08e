use assert_cmd::prelude::*;
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    fs::write(&env_path, "RELAY_URL=ws://127.0.0.1:9\nLOG_LEVEL=warn\n").unwrap();
    env_path.to_str().unwrap().to_string()
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout).unwrap()
}

#[test]
fn keygen_prints_a_matching_pair() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = stdout_of(
        Command::cargo_bin("nostra")
            .unwrap()
            .args(["--env", &env_path, "keygen"]),
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("nsec1"));
    assert!(lines[1].starts_with("npub1"));

    let secret = nostra::Shareable::decode(lines[0]).unwrap();
    let public = nostra::Shareable::decode(lines[1]).unwrap();
    match (secret, public) {
        (nostra::Shareable::SecretKey(sk), nostra::Shareable::PublicKey(pk)) => {
            assert_eq!(sk.public_key(), pk)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn decode_prints_json() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let out = stdout_of(Command::cargo_bin("nostra").unwrap().args([
        "--env",
        &env_path,
        "decode",
        "npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg",
    ]));
    let val: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(val["type"], "npub");
    assert_eq!(
        val["pubkey"],
        "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e"
    );
}

#[test]
fn decode_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    Command::cargo_bin("nostra")
        .unwrap()
        .args(["--env", &env_path, "decode", "npub1notbech32"])
        .assert()
        .failure();
}

#[test]
fn run_fails_when_relay_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    Command::cargo_bin("nostra")
        .unwrap()
        .args(["--env", &env_path, "run"])
        .assert()
        .failure();
}

#[test]
fn missing_env_file_is_created() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("fresh.env");
    Command::cargo_bin("nostra")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "keygen"])
        .assert()
        .success();
    let data = fs::read_to_string(&env_path).unwrap();
    assert!(data.contains("RELAY_URL="));
    assert!(data.contains("LOG_JSON=0"));
}
