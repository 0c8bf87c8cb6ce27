//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("multiloader");
    for var in [
        "MULTILOADER_AVRDUDE",
        "MULTILOADER_PART",
        "MULTILOADER_PROGRAMMER",
        "MULTILOADER_BAUD",
        "MULTILOADER_PORT",
        "MULTILOADER_NON_INTERACTIVE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("multiloader"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("multiloader"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_exit_zero() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("multiloader"));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
        assert!(parsed.is_array());
    }
}

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_without_part_number() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--config", "none.toml", "-P", "/dev/ttyFAKE0", "test"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("part number"));
}

#[test]
fn exit_code_two_without_firmware() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--config", "none.toml", "-p", "atmega328p", "-P", "/dev/ttyFAKE0", "flash"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("firmware"));
}

#[test]
fn exit_code_two_for_missing_firmware_file() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args([
            "--config",
            "none.toml",
            "-p",
            "atmega328p",
            "-P",
            "/dev/ttyFAKE0",
            "flash",
            "missing.hex",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("missing.hex"));
}

#[test]
fn invalid_manifest_fails_with_clean_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("fleet.toml"), "part_number = [[[").expect("write manifest");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--config", "none.toml", "--manifest", "fleet.toml", "--json", "test"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("manifest"));
}

#[test]
fn invalid_config_file_is_a_warning() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("multiloader.toml"), "invalid toml [[[").expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success();
}

#[cfg(unix)]
mod fake_tool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const FAKE_AVRDUDE: &str = r#"#!/bin/sh
port="$8"
case "$port" in
  *fail*)
    echo "avrdude: ser_open(): can't open device \"$port\"" >&2
    exit 1
    ;;
esac
echo "avrdude: Device signature = 0x1e950f (probably m328p)"
echo "args: $*"
"#;

    fn fake_avrdude(dir: &Path) -> PathBuf {
        let path = dir.join("avrdude");
        fs::write(&path, FAKE_AVRDUDE).expect("write fake avrdude");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake avrdude");
        path
    }

    fn json_stdout(output: &std::process::Output) -> serde_json::Value {
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
    }

    #[test]
    fn test_reports_every_board_as_json() {
        let dir = tempdir().expect("tempdir should be created");
        let avrdude = fake_avrdude(dir.path());

        let mut cmd = cli_cmd();
        let output = cmd
            .current_dir(dir.path())
            .arg("--avrdude")
            .arg(&avrdude)
            .args([
                "--config",
                "none.toml",
                "-p",
                "atmega328p",
                "-P",
                "/dev/ttyFAKE0,/dev/ttyFAKE1",
                "--json",
                "test",
            ])
            .output()
            .expect("command should execute");

        assert!(output.status.success());
        let report = json_stdout(&output);
        assert_eq!(report["operation"], "test");
        assert_eq!(report["total"], 2);
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["boards"][1]["port"], "/dev/ttyFAKE1");
        assert!(report["boards"][0]["output"]
            .as_str()
            .unwrap()
            .contains("-p atmega328p"));
    }

    #[test]
    fn failing_board_exits_one_and_others_still_run() {
        let dir = tempdir().expect("tempdir should be created");
        let avrdude = fake_avrdude(dir.path());

        let mut cmd = cli_cmd();
        let output = cmd
            .current_dir(dir.path())
            .arg("--avrdude")
            .arg(&avrdude)
            .args([
                "--config",
                "none.toml",
                "-p",
                "atmega328p",
                "-P",
                "/dev/ttyfail0,/dev/ttyFAKE1,/dev/ttyFAKE2",
                "--parallel",
                "--json",
                "test",
            ])
            .output()
            .expect("command should execute");

        assert_eq!(output.status.code(), Some(1));
        let report = json_stdout(&output);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["boards"][0]["success"], false);
        assert_eq!(report["boards"][1]["success"], true);
        assert_eq!(report["boards"][2]["success"], true);
    }

    #[test]
    fn flash_uses_local_config_file() {
        let dir = tempdir().expect("tempdir should be created");
        let avrdude = fake_avrdude(dir.path());
        fs::write(dir.path().join("blink.hex"), ":00000001FF\n").expect("write image");
        fs::write(
            dir.path().join("multiloader.toml"),
            format!(
                "[tool]\npath = \"{}\"\n\n[fleet]\npart_number = \"atmega328p\"\nport = [\"/dev/ttyFAKE0\", \"/dev/ttyFAKE1\"]\nhex_file = \"blink.hex\"\n",
                avrdude.display()
            ),
        )
        .expect("write config");

        let mut cmd = cli_cmd();
        let output = cmd
            .current_dir(dir.path())
            .args(["--yes", "--json", "flash", "--", "-D"])
            .output()
            .expect("command should execute");

        assert!(output.status.success());
        let report = json_stdout(&output);
        assert_eq!(report["operation"], "flash");
        assert_eq!(report["succeeded"], 2);
        let args = report["boards"][0]["output"].as_str().unwrap();
        assert!(args.contains("-U flash:w:blink.hex:i -D"));
    }

    #[test]
    fn flashing_several_boards_needs_confirmation() {
        let dir = tempdir().expect("tempdir should be created");
        let avrdude = fake_avrdude(dir.path());
        fs::write(dir.path().join("blink.hex"), ":00000001FF\n").expect("write image");

        let mut cmd = cli_cmd();
        cmd.current_dir(dir.path())
            .arg("--avrdude")
            .arg(&avrdude)
            .args([
                "--config",
                "none.toml",
                "-p",
                "atmega328p",
                "-P",
                "/dev/ttyFAKE0,/dev/ttyFAKE1",
                "flash",
                "blink.hex",
            ])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("--yes"));
    }

    #[test]
    fn non_interactive_env_skips_confirmation() {
        let dir = tempdir().expect("tempdir should be created");
        let avrdude = fake_avrdude(dir.path());
        fs::write(dir.path().join("blink.hex"), ":00000001FF\n").expect("write image");

        let mut cmd = cli_cmd();
        cmd.current_dir(dir.path())
            .env("MULTILOADER_NON_INTERACTIVE", "1")
            .env("MULTILOADER_PORT", "/dev/ttyFAKE0,/dev/ttyFAKE1")
            .arg("--avrdude")
            .arg(&avrdude)
            .args(["--config", "none.toml", "-p", "atmega328p", "flash", "blink.hex"])
            .assert()
            .success()
            .stderr(predicate::str::contains("2/2 boards succeeded"));
    }
}
