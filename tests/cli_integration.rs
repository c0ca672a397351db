use serde_json::Value;
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

struct Harness {
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Harness {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn write_config(&self, content: &str) {
        std::fs::write(self.config_path(), content).expect("write config");
    }

    /// Run tmail with `args`, feeding `input` on stdin.
    fn run(&self, args: &[&str], input: &str) -> Output {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tmail"))
            .args(args)
            .arg(format!("--config={}", self.config_path().display()))
            .env("XDG_STATE_HOME", self.dir.path().join("state"))
            .env("HOME", self.dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn tmail");
        {
            let mut stdin = child.stdin.take().expect("take stdin");
            let _ = stdin.write_all(input.as_bytes());
        }
        child.wait_with_output().expect("wait for tmail")
    }
}

/// A local port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

fn unreachable_account(port: u16) -> String {
    format!(
        r#"[account.test]
email = "test@example.com"
imap_host = "127.0.0.1"
imap_port = {}
smtp_host = "127.0.0.1"
use_tls = false
password_command = "echo test"

[ui]
request_timeout_secs = 5
"#,
        port
    )
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_help_lists_options() {
    let output = Command::new(env!("CARGO_BIN_EXE_tmail"))
        .arg("--help")
        .output()
        .expect("run tmail --help");
    assert!(output.status.success());
    let text = stderr(&output);
    assert!(text.contains("--config=PATH"));
    assert!(text.contains("--json"));
}

#[test]
fn test_help_config_prints_sections() {
    let output = Command::new(env!("CARGO_BIN_EXE_tmail"))
        .arg("--help-config")
        .output()
        .expect("run tmail --help-config");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("[account.NAME]"));
    assert!(text.contains("page_size"));
}

#[test]
fn test_invalid_config_exits_1() {
    let h = Harness::new();
    h.write_config("[ui]\npage_size = 0\n");
    let output = h.run(&[], "");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error loading config"));

    h.write_config("[ui]\nbogus = true\n");
    let output = h.run(&[], "");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_no_account_and_setup_declined_exits_1() {
    let h = Harness::new();
    let output = h.run(&[], "");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("No account configured"));
    assert!(!h.config_path().exists());
}

#[test]
fn test_setup_writes_account_from_provider_defaults() {
    let h = Harness::new();
    // Proton accounts go through the local bridge, which is not running.
    let output = h.run(&[], "me@proton.me\necho secret\n");
    assert_eq!(output.status.code(), Some(1));

    let written = std::fs::read_to_string(h.config_path()).expect("config written");
    assert!(written.contains("[account.proton]"));
    assert!(written.contains("imap_host = \"127.0.0.1\""));
    assert!(written.contains("imap_port = 1143"));
    assert!(written.contains("default_account = \"proton\""));
}

#[test]
fn test_unreachable_server_exits_1() {
    let h = Harness::new();
    h.write_config(&unreachable_account(closed_port()));
    let output = h.run(&[], "/quit\n");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("FAILED"));
}

#[test]
fn test_unreachable_server_json_error() {
    let h = Harness::new();
    h.write_config(&unreachable_account(closed_port()));
    let output = h.run(&["--json"], "");
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one JSON line");
    let value: Value = serde_json::from_str(line).expect("parse JSON");
    assert_eq!(value["ok"], false);
    assert_eq!(value["kind"], "network");
}

#[test]
fn test_unknown_account_exits_1() {
    let h = Harness::new();
    h.write_config(&unreachable_account(closed_port()));
    let output = h.run(&["--account=work"], "");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("No account named 'work'"));
}

#[test]
fn test_clear_log_truncates() {
    let h = Harness::new();
    let log_dir: &Path = &h.dir.path().join("state").join("tmail");
    std::fs::create_dir_all(log_dir).unwrap();
    std::fs::write(log_dir.join("tmail.log"), "old entries\n").unwrap();

    let output = h.run(&["--clear-log"], "");
    // No config, no account: setup is declined on empty stdin.
    assert_eq!(output.status.code(), Some(1));
    let log = std::fs::read_to_string(log_dir.join("tmail.log")).unwrap();
    assert!(!log.contains("old entries"));
}
