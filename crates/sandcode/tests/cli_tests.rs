//! CLI integration tests.
//!
//! These tests exercise the CLI commands end-to-end.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary against `project` with an isolated home directory.
fn sandcode(home: &Path, project: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sandcode"))
        .arg("--project")
        .arg(project)
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("SANDCODE_CONFIG_CONTENT")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn tool_names(output: &Output) -> Vec<String> {
    let definitions: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("tools output should be JSON");
    definitions
        .as_array()
        .expect("tools output should be an array")
        .iter()
        .filter_map(|d| d["name"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_sandcode"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Tool runtime for coding agents"));
    assert!(stdout.contains("replay"));
}

#[test]
fn test_tools_command_respects_read_only() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let output = sandcode(home.path(), project.path(), &["tools"]);
    assert!(output.status.success());
    let names = tool_names(&output);
    assert!(names.contains(&"write_file".to_string()));
    assert!(!names.contains(&"execute_sql".to_string()));

    let output = sandcode(home.path(), project.path(), &["--read-only", "tools"]);
    assert!(output.status.success());
    let names = tool_names(&output);
    assert!(names.contains(&"read_file".to_string()));
    assert!(!names.contains(&"write_file".to_string()));
}

#[test]
fn test_config_command_lists_project_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("sandcode.jsonc"),
        "{\n  // no grep here\n  \"tools\": {\"grep\": false}\n}\n",
    )
    .unwrap();

    let output = sandcode(home.path(), project.path(), &["config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sandcode.jsonc"));
    assert!(stdout.contains("\"grep\": false"));
}

#[test]
fn test_replay_writes_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let chunks = project.path().join("chunks.jsonl");
    std::fs::write(
        &chunks,
        concat!(
            r#"{"type":"start","id":"c1","name":"write_file"}"#,
            "\n",
            r#"{"type":"delta","id":"c1","text":"{\"path\": \"hello.txt\", "}"#,
            "\n",
            r#"{"type":"delta","id":"c1","text":"\"content\": \"hi\"}"}"#,
            "\n",
            r#"{"type":"end","id":"c1"}"#,
            "\n",
        ),
    )
    .unwrap();

    let output = sandcode(
        home.path(),
        project.path(),
        &["--yes", "replay", chunks.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        std::fs::read_to_string(project.path().join("hello.txt")).unwrap(),
        "hi"
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines.iter().any(|l| l["type"] == "stream_tag"));
    let last = lines.last().unwrap();
    assert_eq!(last["type"], "result");
    assert_eq!(last["is_error"], false);
}

#[test]
fn test_replay_rejects_escaping_path() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let chunks = project.path().join("chunks.jsonl");
    std::fs::write(
        &chunks,
        concat!(
            r#"{"type":"start","id":"c1","name":"write_file"}"#,
            "\n",
            r#"{"type":"delta","id":"c1","text":"{\"path\": \"../escape.txt\", \"content\": \"x\"}"}"#,
            "\n",
            r#"{"type":"end","id":"c1"}"#,
            "\n",
        ),
    )
    .unwrap();

    let output = sandcode(
        home.path(),
        project.path(),
        &["--yes", "replay", chunks.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert!(!project.path().parent().unwrap().join("escape.txt").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sandcode-error"));
    assert!(stdout.contains("\"is_error\":true"));
}
