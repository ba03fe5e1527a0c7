//! End-to-end invocations of the bogobench binary
#![cfg(unix)]

use std::process::Command;

fn bogobench() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bogobench"))
}

#[test]
fn lists_stressor_names() {
    let out = bogobench().arg("--stressors").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("cpu"));
    assert!(text.contains("vm"));
    assert!(text.contains("pagemove"));
}

#[test]
fn class_query_lists_members_and_exits_zero() {
    let out = bogobench().args(["--class", "cpu?"]).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("class 'cpu' stressors:"));
    assert!(text.contains("cpu"));
}

#[test]
fn rejects_conflicting_modes() {
    let out = bogobench()
        .args(["--all", "1", "--random", "1"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn rejects_unknown_exclude_name() {
    let out = bogobench()
        .args(["--cpu", "1", "-x", "nonesuch", "-t", "1"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(text.contains("nonesuch"));
}

#[test]
fn small_cpu_run_emits_yaml_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("results.yaml");

    let out = bogobench()
        .args([
            "--cpu",
            "2",
            "--cpu-ops",
            "200",
            "-t",
            "30",
            "-M",
            "-Y",
        ])
        .arg(&yaml_path)
        .arg("--temp-path")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let yaml = std::fs::read_to_string(&yaml_path).unwrap();
    assert!(yaml.starts_with("---\nruninfo:\n"));
    assert!(yaml.contains("metrics:"));
    assert!(yaml.contains("    - stressor: cpu"));
    assert!(yaml.contains("      bogo-ops: 200"));
    assert!(yaml.ends_with("...\n"));
}

#[test]
fn dry_run_spawns_but_does_no_work() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("dry.yaml");

    let out = bogobench()
        .args(["--cpu", "1", "-n", "-t", "5", "-M", "-Y"])
        .arg(&yaml_path)
        .arg("--temp-path")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let yaml = std::fs::read_to_string(&yaml_path).unwrap();
    assert!(yaml.contains("      bogo-ops: 0"));
}

#[test]
fn job_file_selects_stressors() {
    let dir = tempfile::tempdir().unwrap();
    let job_path = dir.path().join("quick.job");
    std::fs::write(&job_path, "# quick smoke\ncpu 1\ncpu-ops 50\ntimeout 30\n").unwrap();

    let out = bogobench()
        .arg("-j")
        .arg(&job_path)
        .arg("--temp-path")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}
