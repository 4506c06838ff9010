#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mavwire_frame::{CodecConfig, Dialect, Heartbeat};
use serde_json::Value;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/mavcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) -> UnixStream {
    let start = Instant::now();
    loop {
        if let Ok(stream) = UnixStream::connect(path) {
            return stream;
        }
        if start.elapsed() >= timeout {
            panic!("listener did not come up at {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_listen(sock: &Path, count: usize) -> Child {
    Command::new(env!("CARGO_BIN_EXE_mavwire"))
        .args(["--log-level", "error", "--format", "json", "listen"])
        .arg(format!("unix:{}", sock.display()))
        .args(["--count", &count.to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen command should start")
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    while child.try_wait().expect("child status").is_none() {
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("command did not exit in time");
        }
        thread::sleep(Duration::from_millis(25));
    }
    child.wait_with_output().expect("child output")
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect()
}

fn heartbeat_wire(system_id: u8) -> Vec<u8> {
    let config = CodecConfig {
        dialect: Some(Arc::new(Dialect::minimal())),
        out_system_id: system_id,
        ..CodecConfig::default()
    };
    let (_, mut writer) = config.build(std::io::empty(), Vec::new()).unwrap();
    let heartbeat = Heartbeat {
        custom_mode: 0,
        mav_type: 1,
        autopilot: 8,
        base_mode: 0,
        system_status: 4,
        mavlink_version: 3,
    };
    writer.write_message(&heartbeat.to_message()).unwrap();
    writer.into_inner()
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_mavwire"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("mavwire {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn listen_reports_frames_and_parse_errors() {
    let dir = unique_temp_dir("listen");
    let sock = dir.join("node.sock");
    let child = spawn_listen(&sock, 1);

    let mut client = wait_for_socket(&sock, Duration::from_secs(3));
    let mut corrupt = heartbeat_wire(3);
    let crc_at = corrupt.len() - 2;
    corrupt[crc_at] ^= 0xFF;
    client.write_all(&corrupt).unwrap();
    client.write_all(&heartbeat_wire(3)).unwrap();

    let output = wait_with_timeout(child, Duration::from_secs(10));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let events = json_lines(&output.stdout);
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
    assert_eq!(kinds, ["channel_open", "parse_error", "frame"]);

    let frame = &events[2];
    assert_eq!(frame["system_id"], 3);
    assert_eq!(frame["message_id"], 0);
    assert_eq!(frame["version"], 2);
    assert_eq!(frame["signed"], false);
    assert!(events[1]["error"].as_str().unwrap().contains("checksum"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_delivers_to_listen() {
    let dir = unique_temp_dir("send");
    let sock = dir.join("node.sock");
    let child = spawn_listen(&sock, 1);
    drop(wait_for_socket(&sock, Duration::from_secs(3)));

    let sent = Command::new(env!("CARGO_BIN_EXE_mavwire"))
        .args(["--log-level", "error", "--format", "json", "send"])
        .arg(format!("unix:{}", sock.display()))
        .args(["--msg-id", "0", "--payload", "000000000108000403"])
        .args(["--system-id", "9"])
        .output()
        .expect("send should run");
    assert!(
        sent.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&sent.stderr)
    );
    let receipt = json_lines(&sent.stdout);
    assert_eq!(receipt[0]["message_id"], 0);
    assert_eq!(receipt[0]["payload_size"], 9);

    let output = wait_with_timeout(child, Duration::from_secs(10));
    let frames: Vec<Value> = json_lines(&output.stdout)
        .into_iter()
        .filter(|e| e["event"] == "frame")
        .collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["system_id"], 9);
    assert_eq!(frames[0]["payload"], "000000000108000403");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_mavwire"))
        .args(["--log-level", "error", "send"])
        .arg(format!("unix:{}", dir.join("absent.sock").display()))
        .args(["--msg-id", "0"])
        .output()
        .expect("send should run");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_unknown_message_without_crc_extra_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_mavwire"))
        .args(["--log-level", "error", "send", "127.0.0.1:9", "--msg-id", "42"])
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}
