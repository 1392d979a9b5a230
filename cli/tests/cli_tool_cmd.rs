use std::process::Command;

fn run_echogarden(db_path: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_echogarden"))
        .arg("--db-path")
        .arg(db_path)
        .args(args)
        .env_remove("EG_LLM_URL")
        .output()
        .expect("failed to run echogarden binary")
}

#[test]
fn cli_help_succeeds() {
    let out = Command::new(env!("CARGO_BIN_EXE_echogarden")).arg("--help").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("EchoGarden"));
    assert!(stdout.contains("tool"));
}

#[test]
fn cli_tool_list_includes_every_registered_tool() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_echogarden(&dir.path().join("eg.db"), &["tool", "list"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("text_embed"));
    assert!(stdout.contains("weaver"));
    assert!(stdout.contains("retrieval"));
}

#[test]
fn cli_tool_show_existing_tool_renders_yaml_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_echogarden(&dir.path().join("eg.db"), &["tool", "show", "text_embed"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("name: text_embed"));
}

#[test]
fn cli_tool_show_missing_tool_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_echogarden(&dir.path().join("eg.db"), &["tool", "show", "no_such_tool"]);
    assert!(!out.status.success());
}
