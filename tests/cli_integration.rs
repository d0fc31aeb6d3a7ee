//! Integration tests for the command-line interface
//!
//! Drives the built binary for the apply, check and list commands.

use std::fs;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const MODEL_OUTPUT: &str = r#"Sure, here is the update.
<ai_gen:data>
<ai_gen:file path="src/hello.js">
function hello() {
  return "Hello";
}
</ai_gen:file>
<ai_gen:function path="src/main.js" name="world">
function world() {
  return "Modified";
}
</ai_gen:function>
</ai_gen:data>
"#;

/// Helper to create a project with one existing source file and an input file
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("src/main.js"),
        "function world() {\n  return \"World\";\n}\n",
    )
    .unwrap();
    fs::write(dir.path().join("output.txt"), MODEL_OUTPUT).unwrap();
    dir
}

fn run(dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_aigen-patcher"))
        .args(args)
        .arg("--base")
        .arg(dir.path())
        .env_remove("AIGEN_BASE_DIR")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_apply_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_aigen-patcher"))
        .args(["apply", "--help"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Extract, validate and apply directives"));
    assert!(stdout.contains("--dry-run"));
}

#[test]
fn test_apply_basic() {
    let dir = setup_project();
    let input = dir.path().join("output.txt");

    let output = run(&dir, &["apply", "--input", input.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Base:"));
    assert!(stdout.contains("Summary:"));

    let hello = fs::read_to_string(dir.path().join("src/hello.js")).unwrap();
    assert!(hello.contains("return \"Hello\""));
    let main = fs::read_to_string(dir.path().join("src/main.js")).unwrap();
    assert_eq!(main, "function world() {\n  return \"Modified\";\n}\n");
}

#[test]
fn test_apply_reads_stdin() {
    let dir = setup_project();

    let mut child = Command::new(env!("CARGO_BIN_EXE_aigen-patcher"))
        .args(["apply", "--no-backup", "--base"])
        .arg(dir.path())
        .env_remove("AIGEN_BASE_DIR")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(MODEL_OUTPUT.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success(), "{:?}", output);
    assert!(dir.path().join("src/hello.js").exists());
    let backups = fs::read_dir(dir.path().join("src"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .contains(".backup.")
        })
        .count();
    assert_eq!(backups, 0);
}

#[test]
fn test_apply_dry_run_json() {
    let dir = setup_project();
    let input = dir.path().join("output.txt");

    let output = run(
        &dir,
        &["apply", "--dry-run", "--json", "--input", input.to_str().unwrap()],
    );

    assert!(output.status.success(), "{:?}", output);
    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["kind"], "file_replace");
    assert_eq!(records[1]["kind"], "function_replace");
    assert_eq!(records[1]["name"], "world");
    assert!(records.iter().all(|r| r["success"] == true));

    assert!(!dir.path().join("src/hello.js").exists());
    let main = fs::read_to_string(dir.path().join("src/main.js")).unwrap();
    assert!(main.contains("World"));
}

#[test]
fn test_apply_refuses_invalid_input() {
    let dir = setup_project();
    let input = dir.path().join("evil.txt");
    fs::write(
        &input,
        r#"<ai_gen:data>
<ai_gen:file path="ok.txt">fine</ai_gen:file>
<ai_gen:file path="../escape.txt">bad</ai_gen:file>
</ai_gen:data>"#,
    )
    .unwrap();

    let output = run(&dir, &["apply", "--input", input.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Validation failed"));
    assert!(stderr.contains("../escape.txt"));
    // Nothing is applied, not even the valid directive
    assert!(!dir.path().join("ok.txt").exists());
}

#[test]
fn test_apply_reports_failures_with_exit_code() {
    let dir = setup_project();
    let input = dir.path().join("missing.txt");
    fs::write(
        &input,
        r#"<ai_gen:data>
<ai_gen:function path="src/absent.js" name="run">function run() {}</ai_gen:function>
<ai_gen:file path="src/written.js">ok</ai_gen:file>
</ai_gen:data>"#,
    )
    .unwrap();

    let output = run(&dir, &["apply", "--input", input.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("File not found"));
    assert!(dir.path().join("src/written.js").exists());
}

#[test]
fn test_check_json_report() {
    let dir = setup_project();
    let input = dir.path().join("output.txt");

    let output = run(&dir, &["check", "--json", "--input", input.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files"], 1);
    assert_eq!(report["functions"], 1);
    assert_eq!(report["validation"]["valid"], true);
}

#[test]
fn test_list_uses_config_namespace() {
    let dir = setup_project();
    fs::write(dir.path().join("aigen.toml"), "[tags]\nnamespace = \"gen\"\n").unwrap();
    let input = dir.path().join("gen.txt");
    fs::write(
        &input,
        r#"<gen:data><gen:file path="x.txt">x</gen:file></gen:data>"#,
    )
    .unwrap();

    let output = run(&dir, &["list", "--json", "--input", input.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["files"][0]["path"], "x.txt");
    assert_eq!(result["functions"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_missing_input_file_is_fatal() {
    let dir = setup_project();
    let input = dir.path().join("does-not-exist.txt");

    let output = run(&dir, &["list", "--input", input.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read input"));
}
