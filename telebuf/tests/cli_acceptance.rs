use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    /// Point the collector at a local port nothing listens on
    fn with_unreachable_collector() -> Self {
        let env = Self::new();
        let config_dir = env.xdg_config.join("telebuf");
        fs::create_dir_all(&config_dir).expect("failed to create config dir");
        fs::write(
            config_dir.join("config.toml"),
            r#"
[collector]
api_host = "127.0.0.1"
api_port = 9
app_key = "test-key"
max_send_size = 2
device_id = "cli-test-device"
connect_timeout_secs = 1
read_timeout_secs = 1
write_timeout_secs = 1
"#,
        )
        .expect("failed to write config");
        env
    }

    fn outbox(&self) -> PathBuf {
        self.xdg_data.join("telebuf/outbox")
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("telebuf"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute telebuf: {e}"))
}

fn assert_success(args: &[&str], output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return stdout;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "telebuf {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

#[test]
fn status_without_config_reports_not_ready() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["status"]);
    let stdout = assert_success(&["status"], &output);

    assert!(stdout.contains("telebuf Collector Configuration"));
    assert!(stdout.contains("Host:            <not set>"));
    assert!(stdout.contains("Status: Not ready"));
    assert!(stdout.contains("Pending Envelopes: 0"));
}

#[test]
fn flush_and_demo_without_config_do_nothing() {
    let env = CliTestEnv::new();

    let flush = run_bin(&env, &["flush"]);
    let stdout = assert_success(&["flush"], &flush);
    assert!(stdout.contains("Collector is not configured"));

    let demo = run_bin(&env, &["demo"]);
    let stdout = assert_success(&["demo"], &demo);
    assert!(stdout.contains("Collector is not configured"));
    assert!(!env.outbox().exists());
}

#[test]
fn demo_keeps_undelivered_envelopes_in_outbox() {
    let env = CliTestEnv::with_unreachable_collector();

    let args = ["demo", "--events", "3"];
    let demo = run_bin(&env, &args);
    let stdout = assert_success(&args, &demo);
    assert!(stdout.contains("Demo session tracked"));
    assert!(stdout.contains("Device ID:  cli-test-device"));
    assert!(stdout.contains("Delivered:  0"));
    assert!(env.outbox().is_dir());

    let status = run_bin(&env, &["status"]);
    let stdout = assert_success(&["status"], &status);
    assert!(stdout.contains("Status: Ready to deliver to http://127.0.0.1:9/apipool"));
    assert!(
        !stdout.contains("Pending Envelopes: 0"),
        "expected pending envelopes after an offline demo, got:\n{stdout}"
    );

    let flush = run_bin(&env, &["flush"]);
    let stdout = assert_success(&["flush"], &flush);
    assert!(stdout.contains("Flushing"));
    assert!(stdout.contains("No envelopes delivered"));
}

#[test]
fn flush_with_empty_outbox() {
    let env = CliTestEnv::with_unreachable_collector();

    let output = run_bin(&env, &["flush"]);
    let stdout = assert_success(&["flush"], &output);
    assert!(stdout.contains("No pending envelopes to flush."));
}
