//! Run the bog binary against real cache files and eyeball its output.

use bog::fs_state::FileSystemState;
use bog::generate::OperationGraphGenerator;
use bog::graph::OperationId;
use bog::results::{OperationResult, OperationResults};
use bog::{graph_file, results_file};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::TimeZone;

fn bog_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join(format!("bog{}", std::env::consts::EXE_SUFFIX))
}

fn run_bog(args: &[&str], dir: &std::path::Path) -> std::process::Output {
    std::process::Command::new(bog_binary())
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn bog")
}

fn assert_output_contains(out: &std::process::Output, text: &str) {
    let stdout = std::str::from_utf8(&out.stdout).unwrap();
    if !stdout.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, stdout
        );
    }
}

fn write_caches(dir: &std::path::Path) {
    let graph_path = Utf8PathBuf::from_path_buf(dir.join("graph.bog")).unwrap();
    let results_path = Utf8PathBuf::from_path_buf(dir.join("results.bor")).unwrap();

    let mut state = FileSystemState::new();
    let mut gen = OperationGraphGenerator::new(
        &mut state,
        vec![Utf8PathBuf::from("/w/")],
        vec![Utf8PathBuf::from("/w/out/")],
    );
    gen.create_operation(
        "compile a.cpp",
        Utf8Path::new("cc"),
        vec!["-c".to_owned(), "src/a.cpp".to_owned()],
        Utf8Path::new("/w"),
        &[Utf8PathBuf::from("src/a.cpp")],
        &[Utf8PathBuf::from("out/a.o")],
    )
    .unwrap();
    gen.create_operation(
        "link app",
        Utf8Path::new("ld"),
        vec!["out/a.o".to_owned()],
        Utf8Path::new("/w"),
        &[Utf8PathBuf::from("out/a.o")],
        &[Utf8PathBuf::from("out/app")],
    )
    .unwrap();
    let mut graph = gen.finalize_graph();
    graph_file::save(&graph_path, &mut graph, &state).unwrap();

    let mut results = OperationResults::new();
    results.set_result(
        OperationId(1),
        OperationResult {
            was_successful_run: true,
            evaluate_time: chrono::Utc.timestamp_opt(1_724_500_000, 0).unwrap(),
            observed_input: graph.operation(OperationId(1)).declared_input.clone(),
            observed_output: graph.operation(OperationId(1)).declared_output.clone(),
        },
    );
    results_file::save(&results_path, &mut results, &state).unwrap();
}

#[test]
fn dumps_graph() {
    let space = tempfile::tempdir().unwrap();
    write_caches(space.path());

    let out = run_bog(&["graph", "graph.bog"], space.path());
    assert!(out.status.success());
    assert_output_contains(&out, "2 operations");
    assert_output_contains(&out, "roots: 1");
    assert_output_contains(&out, "compile a.cpp");
    assert_output_contains(&out, "out: /w/out/a.o");
    assert_output_contains(&out, "children: 2");
}

#[test]
fn dumps_results() {
    let space = tempfile::tempdir().unwrap();
    write_caches(space.path());

    let out = run_bog(&["results", "results.bor"], space.path());
    assert!(out.status.success());
    assert_output_contains(&out, "1 results");
    assert_output_contains(&out, "#1 ok");
    assert_output_contains(&out, "in: /w/src/a.cpp");
}

#[test]
fn missing_file_is_an_error() {
    let space = tempfile::tempdir().unwrap();

    let out = run_bog(&["graph", "absent.bog"], space.path());
    assert!(!out.status.success());
    assert_output_contains(&out, "bog: error:");
}
