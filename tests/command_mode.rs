//! Integration tests for the calx command line

use std::path::PathBuf;
use std::process::Command;

fn run_calx(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_calx"))
        .args(args)
        // Tests must be deterministic and not depend on a user's ~/.config/calx/config.toml.
        .env("XDG_CONFIG_HOME", env!("CARGO_TARGET_TMPDIR"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute calx");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    (stdout, stderr, exit_code)
}

fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    std::fs::write(&path, content).expect("Failed to write temp file");
    path
}

#[test]
fn test_single_definition() {
    let (stdout, _, code) = run_calx(&["a=5 + 3"]);
    assert_eq!(stdout.trim(), "a = 8");
    assert_eq!(code, 0);
}

#[test]
fn test_dependency_chain() {
    let (stdout, _, code) = run_calx(&["a=1", "b=a + 1", "c=a + b"]);
    assert_eq!(stdout.trim(), "a = 1\nb = 2\nc = 3");
    assert_eq!(code, 0);
}

#[test]
fn test_output_sorted_by_name() {
    let (stdout, _, code) = run_calx(&["zeta=1", "alpha=2", "mid=zeta * 10"]);
    assert_eq!(stdout.trim(), "alpha = 2\nmid = 10\nzeta = 1");
    assert_eq!(code, 0);
}

#[test]
fn test_display_normalization() {
    let (stdout, _, code) = run_calx(&["f=6.0 / 2.0", "h=1.0 / 4.0", "t=1 < 2", "s=\"hi\""]);
    assert_eq!(stdout.trim(), "f = 3\nh = 0.25\ns = hi\nt = true");
    assert_eq!(code, 0);
}

#[test]
fn test_names_inside_strings_are_not_dependencies() {
    let (stdout, _, code) = run_calx(&["a=1", "b=\"a\" + 1"]);
    assert_eq!(stdout.trim(), "a = 1\nb = a1");
    assert_eq!(code, 0);
}

#[test]
fn test_error_is_isolated() {
    let (stdout, stderr, code) = run_calx(&["a=1 +", "b=2"]);
    assert!(stdout.contains("a = #ERR!"));
    assert!(stdout.contains("b = 2"));
    assert!(stderr.contains("a:"));
    assert_eq!(code, 1);
}

#[test]
fn test_failure_propagates_to_dependents() {
    let (stdout, stderr, code) = run_calx(&["a=undefined_function()", "b=a + 1"]);
    assert_eq!(stdout.trim(), "a = #ERR!\nb = #ERR!");
    assert!(stderr.contains("b: failed to run due to input error from a"), "stderr: {}", stderr);
    assert_eq!(code, 1);
}

#[test]
fn test_custom_functions_file() {
    let path = temp_file("double.rhai", "fn double(x) { x * 2 }");
    let path = path.to_string_lossy();
    let (stdout, _, code) = run_calx(&["-f", &path, "a=21", "b=double(a)"]);
    assert_eq!(stdout.trim(), "a = 21\nb = 42");
    assert_eq!(code, 0);
}

#[test]
fn test_config_operation_limit() {
    let path = temp_file("limits.toml", "[engine]\nmax_operations = 1000\n");
    let path = path.to_string_lossy();
    let (stdout, _, code) = run_calx(&["-c", &path, "a=let n = 0; loop { n += 1; }", "b=1"]);
    assert_eq!(stdout.trim(), "a = #ERR!\nb = 1");
    assert_eq!(code, 1);
}

#[test]
fn test_bad_config_is_reported() {
    let path = temp_file("bad.toml", "[kernel]\nthreads = 4\n");
    let path = path.to_string_lossy();
    let (stdout, stderr, code) = run_calx(&["-c", &path, "a=1"]);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Failed to load config"));
    assert_eq!(code, 1);
}

#[test]
fn test_invalid_name() {
    let (stdout, stderr, code) = run_calx(&["1a=2"]);
    assert!(stdout.is_empty());
    assert!(stderr.contains("1a"));
    assert_eq!(code, 1);
}

#[test]
fn test_duplicate_name() {
    let (_, stderr, code) = run_calx(&["a=1", "a=2"]);
    assert!(stderr.contains("is taken"), "stderr: {}", stderr);
    assert_eq!(code, 1);
}

#[test]
fn test_usage_errors() {
    let (_, stderr, code) = run_calx(&[]);
    assert!(stderr.contains("Usage: calx"));
    assert_eq!(code, 1);

    let (_, stderr, code) = run_calx(&["noequals"]);
    assert!(stderr.contains("expected NAME=CODE"));
    assert_eq!(code, 1);
}

#[test]
fn test_help() {
    let (stdout, stderr, code) = run_calx(&["--help"]);
    assert!(stdout.is_empty());
    assert!(stderr.contains("--functions"));
    assert_eq!(code, 0);
}
