//! End-to-end fleet runs against a stand-in avrdude script.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use multiloader::{
    Avrdude, BoardOutcome, Error, ExecutionMode, FleetConfig, FleetController, StaticPorts,
};
use tempfile::TempDir;

/// Ports containing `fail` are rejected, ports containing `slow` record their
/// pid next to the script and hang, every other port answers like an
/// ATmega328P.
const FAKE_AVRDUDE: &str = r#"#!/bin/sh
port="$8"
case "$port" in
  *fail*)
    echo "avrdude: ser_open(): can't open device \"$port\"" >&2
    exit 1
    ;;
  *slow*)
    echo $$ > "$(dirname "$0")/slow.pid"
    echo "avrdude: stk500_recv(): waiting"
    exec sleep 30
    ;;
esac
echo "avrdude: Device signature = 0x1e950f (probably m328p)"
echo "args: $*"
"#;

fn fake_avrdude(dir: &Path) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = dir.join("avrdude");
    fs::write(&path, FAKE_AVRDUDE).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn tool(dir: &TempDir, timeout: Duration) -> Arc<Avrdude> {
    Arc::new(Avrdude::new(fake_avrdude(dir.path())).with_timeout(timeout))
}

#[test]
fn flashes_two_boards_in_order() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::new("atmega328p", "arduino", 115200).with_hex_file("/tmp/blink.hex");
    let discovery = StaticPorts::new(["/dev/ttyFAKE0", "/dev/ttyFAKE1"]);

    let mut fleet =
        FleetController::with_tool(&config, &discovery, tool(&dir, Duration::from_secs(10))).unwrap();
    let outcome = fleet.flash_firmware(None, &[]).unwrap();

    assert_eq!(outcome.len(), 2);
    assert!(outcome.all_succeeded());
    for (i, board) in outcome.iter().enumerate() {
        assert_eq!(board.index(), i);
        assert_eq!(board.board().port, format!("/dev/ttyFAKE{i}"));
        assert!(board.output().contains("-p atmega328p"));
        assert!(board.output().contains("-U flash:w:/tmp/blink.hex:i"));
    }
    let conf = dir.path().join("avrdude.conf");
    assert!(outcome.get(0).unwrap().output().contains(&conf.display().to_string()));
}

#[test]
fn failing_board_does_not_affect_the_rest() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::new("atmega328p", "arduino", 115200)
        .with_ports(["/dev/ttyfail0", "/dev/ttyFAKE1", "/dev/ttyFAKE2"]);

    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let mut fleet =
            FleetController::with_tool(&config, &StaticPorts::default(), tool(&dir, Duration::from_secs(10)))
                .unwrap()
                .with_execution_mode(mode);
        let outcome = fleet.test_connections(&[]);

        let flags: Vec<bool> = outcome.iter().map(BoardOutcome::success).collect();
        assert_eq!(flags, [false, true, true]);
        assert!(outcome.get(0).unwrap().output().contains("can't open device"));
        assert!(!outcome.get(1).unwrap().output().contains("can't open device"));
        assert!(matches!(
            outcome.get(0).unwrap().error(),
            Some(Error::ToolReportedFailure {
                exit_code: Some(1),
                ..
            })
        ));
    }
}

#[test]
fn hung_board_times_out_and_others_complete() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::new("atmega328p", "arduino", 115200)
        .with_ports(["/dev/ttyFAKE0", "/dev/ttyslow1", "/dev/ttyFAKE2"]);

    let mut fleet =
        FleetController::with_tool(&config, &StaticPorts::default(), tool(&dir, Duration::from_millis(500)))
            .unwrap();

    let started = Instant::now();
    let outcome = fleet.test_connections(&[]);
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(outcome.get(0).unwrap().success());
    let hung = outcome.get(1).unwrap();
    assert!(matches!(hung.error(), Some(Error::ProcessTimeout { .. })));
    assert!(hung.output().contains("waiting"));
    assert!(outcome.get(2).unwrap().success());

    let pid: i32 = fs::read_to_string(dir.path().join("slow.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err(),
        "timed-out avrdude {pid} is still running"
    );
}

#[test]
fn missing_tool_is_reported_per_board() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::new("atmega328p", "arduino", 115200).with_ports(["/dev/ttyFAKE0", "/dev/ttyFAKE1"]);
    let avrdude = Arc::new(Avrdude::new(dir.path().join("no-such-avrdude")));

    let mut fleet = FleetController::with_tool(&config, &StaticPorts::default(), avrdude).unwrap();
    let outcome = fleet.test_connections(&[]);

    assert_eq!(outcome.failed(), 2);
    assert!(outcome
        .iter()
        .all(|o| matches!(o.error(), Some(Error::ProcessLaunch { .. }))));
}

#[test]
fn mismatched_list_lengths_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::new(["atmega328p", "atmega2560"], "arduino", 115200)
        .with_ports(["/dev/ttyFAKE0", "/dev/ttyFAKE1", "/dev/ttyFAKE2"]);

    let err = FleetController::with_tool(&config, &StaticPorts::default(), tool(&dir, Duration::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, Error::FleetConfig(_)));
}
