//! Scenario runs against local servers, through the library and the CLI

mod common;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use common::Broker;
use wstester::common::config::Config;
use wstester::testing::{load_scenario, parse_scenario, ActionStatus, ScenarioStatus};
use wstester::AppSession;

fn session() -> AppSession {
    let mut config = Config::default();
    config.connection.connect_timeout_ms = 5_000;
    config.runner.assertion_poll_interval_ms = 20;
    AppSession::new(config)
}

/// Run the wstester binary with a throwaway config location
fn wstester(args: &[&str], home: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wstester"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run wstester")
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_raw_echo_scenario_passes() {
    let url = common::echo_server().await;
    let scenario = parse_scenario(&format!(
        r#"{{
            "name": "echo",
            "variables": {{ "URL": "{}" }},
            "actions": [
                {{ "type": "connect", "url": "${{URL}}" }},
                {{ "type": "assert", "assertionType": "status_is", "expected": "connected" }},
                {{ "type": "send", "message": {{ "op": "ping", "n": 1 }} }},
                {{ "type": "assert", "assertionType": "message_received", "timeout": 2000 }},
                {{ "type": "assert", "assertionType": "message_contains", "expected": "\"op\":\"ping\"" }},
                {{ "type": "assert", "assertionType": "json_valid" }},
                {{ "type": "assert", "assertionType": "message_count", "expected": 1 }},
                {{ "type": "disconnect" }},
                {{ "type": "assert", "assertionType": "status_is", "expected": "disconnected" }}
            ]
        }}"#,
        url
    ))
    .unwrap();

    let result = session().runner().run(&scenario).await.unwrap();
    assert!(result.is_passed(), "{:#?}", result.results);
    assert_eq!(result.passed, 9);
    assert!(result.summary.contains("Status: PASSED"));
}

#[tokio::test]
async fn test_stomp_scenario_from_yaml() {
    let broker = Broker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "chat.yaml",
        &format!(
            r#"
name: stomp chat
config:
  timeout: 5000
variables:
  TOPIC: /topic/chat
actions:
  - type: connect
    url: {}
    connectionType: stomp
    token: abc123
  - type: subscribe
    destination: ${{TOPIC}}
  - type: assert
    assertionType: subscription_exists
    expected: ${{TOPIC}}
  - type: send
    destination: ${{TOPIC}}
    message: '{{"text":"hello"}}'
  - type: assert
    assertionType: message_contains
    expected: '"text":"hello"'
    timeout: 2000
  - type: assert
    assertionType: json_valid
  - type: unsubscribe
    destination: ${{TOPIC}}
  - type: disconnect
"#,
            broker.url
        ),
    );

    let scenario = load_scenario(&path).unwrap();
    let result = session().runner().run(&scenario).await.unwrap();
    assert!(result.is_passed(), "{:#?}", result.results);

    let send = &broker.frames(wstester::stomp::Command::Send)[0];
    assert_eq!(send.get("Authorization"), Some("Bearer abc123"));
}

#[tokio::test]
async fn test_stomp_send_without_destination_stops_run() {
    let broker = Broker::start().await;
    let scenario = parse_scenario(&format!(
        r#"{{
            "name": "no destination",
            "actions": [
                {{ "type": "connect", "url": "{}", "connectionType": "stomp" }},
                {{ "type": "send", "message": "orphan" }},
                {{ "type": "disconnect" }}
            ]
        }}"#,
        broker.url
    ))
    .unwrap();

    let session = session();
    let result = session.runner().run(&scenario).await.unwrap();
    assert_eq!(result.status, ScenarioStatus::Failed);
    let statuses: Vec<_> = result.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ActionStatus::Passed, ActionStatus::Failed, ActionStatus::Skipped]
    );
    assert!(result.results[1].message.contains("destination"));
    session.shutdown().await;
}

#[test]
fn test_bundled_scenarios_are_valid() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    let mut checked = 0;
    for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        let scenario = load_scenario(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert!(!scenario.actions.is_empty());
        checked += 1;
    }
    assert!(checked >= 2);
}

#[test]
fn test_cli_validate() {
    let dir = tempfile::tempdir().unwrap();
    let good = write(
        dir.path(),
        "good.json",
        r#"{"name":"ok","actions":[{"type":"wait","duration":10},{"type":"log","message":"hi"}]}"#,
    );
    let bad = write(
        dir.path(),
        "bad.json",
        r#"{"name":"bad","actions":[{"type":"teleport"}]}"#,
    );

    let output = wstester(&["validate", good.to_str().unwrap()], dir.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok (2 actions)"), "{}", stdout);

    let output = wstester(&["validate", bad.to_str().unwrap()], dir.path());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("teleport"), "{}", stderr);
}

#[test]
fn test_cli_run_json_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let passing = write(
        dir.path(),
        "pass.json",
        r#"{"name":"pass","actions":[{"type":"log","message":"${GREETING}"}]}"#,
    );
    let failing = write(
        dir.path(),
        "fail.json",
        r#"{"name":"fail","actions":[{"type":"send","message":"nobody listening"}]}"#,
    );

    let output = wstester(
        &["run", passing.to_str().unwrap(), "--json", "--var", "GREETING=hello"],
        dir.path(),
    );
    assert!(output.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["status"], "passed");
    assert_eq!(doc["results"][0]["message"], "hello");

    let output = wstester(&["run", failing.to_str().unwrap()], dir.path());
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Scenario Failed"), "{}", stdout);
    assert!(stdout.contains("not connected"), "{}", stdout);
}

#[test]
fn test_cli_config_init() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wstester.toml");
    let path_arg = path.to_str().unwrap();

    let output = wstester(&["config", "--config", path_arg], dir.path());
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found, using defaults"), "{}", stderr);
    assert!(!path.exists());

    let output = wstester(&["config", "--init", "--config", path_arg], dir.path());
    assert!(output.status.success());
    assert!(!String::from_utf8_lossy(&output.stderr).contains("not found"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wrote default configuration"), "{}", stdout);
    let written = Config::load_from(&path).unwrap();
    assert_eq!(written.connection.max_reconnect_attempts, 3);

    std::fs::write(&path, "[connection]\nconnect_timeout_ms = 1234\n").unwrap();
    let output = wstester(&["config", "--config", path_arg], dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("connect_timeout_ms = 1234"), "{}", stdout);
}
