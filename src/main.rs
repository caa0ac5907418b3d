//! Pretty-printer for the operation graph and results cache files,
//! mostly useful when debugging why a build reran something.

use anyhow::bail;
use bog::fs_state::FileSystemState;
use bog::graph_file;
use bog::results_file;
use camino::Utf8Path;

#[derive(argh::FromArgs)]
/// inspect operation graph cache files
struct Args {
    #[argh(subcommand)]
    cmd: Cmd,
}

/// which kind of cache file to inspect
#[derive(argh::FromArgs)]
#[argh(subcommand)]
enum Cmd {
    Graph(GraphArgs),
    Results(ResultsArgs),
}

/// print the operations stored in a graph (.bog) file
#[derive(argh::FromArgs)]
#[argh(subcommand, name = "graph")]
struct GraphArgs {
    /// path to the graph file
    #[argh(positional)]
    path: String,
}

/// print the cached results stored in a results (.bor) file
#[derive(argh::FromArgs)]
#[argh(subcommand, name = "results")]
struct ResultsArgs {
    /// path to the results file
    #[argh(positional)]
    path: String,
}

fn join_paths(state: &FileSystemState, ids: &[bog::fs_state::FileId]) -> String {
    let mut out = String::new();
    for &id in ids {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(state.path(id).as_str());
    }
    out
}

fn dump_graph(path: &Utf8Path) -> anyhow::Result<()> {
    let mut state = FileSystemState::new();
    let graph = match graph_file::load(path, &mut state) {
        Some(graph) => graph,
        None => bail!("no usable operation graph at {}", path),
    };

    println!(
        "{}: {} operations, {} files",
        path,
        graph.len(),
        graph.referenced_files().len()
    );
    let mut roots = String::new();
    for id in graph.root_operation_ids() {
        if !roots.is_empty() {
            roots.push(' ');
        }
        roots.push_str(&id.to_string());
    }
    println!("roots: {}", roots);

    for id in graph.sorted_operation_ids() {
        let op = graph.operation(id);
        println!("#{} {}", op.id, op.title);
        println!("  command: {}", op.command);
        if !op.declared_input.is_empty() {
            println!("  in: {}", join_paths(&state, &op.declared_input));
        }
        if !op.declared_output.is_empty() {
            println!("  out: {}", join_paths(&state, &op.declared_output));
        }
        if !op.read_access.is_empty() {
            println!("  read access: {}", join_paths(&state, &op.read_access));
        }
        if !op.write_access.is_empty() {
            println!("  write access: {}", join_paths(&state, &op.write_access));
        }
        if !op.children.is_empty() {
            let mut children = String::new();
            for child in &op.children {
                if !children.is_empty() {
                    children.push(' ');
                }
                children.push_str(&child.to_string());
            }
            println!("  children: {}", children);
        }
        println!("  dependencies: {}", op.dependency_count);
    }
    Ok(())
}

fn dump_results(path: &Utf8Path) -> anyhow::Result<()> {
    let mut state = FileSystemState::new();
    let results = match results_file::load(path, &mut state) {
        Some(results) => results,
        None => bail!("no usable operation results at {}", path),
    };

    println!(
        "{}: {} results, {} files",
        path,
        results.len(),
        results.referenced_files().len()
    );
    for id in results.sorted_operation_ids() {
        let result = &results.results()[&id];
        println!(
            "#{} {} at {}",
            id,
            if result.was_successful_run { "ok" } else { "failed" },
            result.evaluate_time.to_rfc3339()
        );
        if !result.observed_input.is_empty() {
            println!("  in: {}", join_paths(&state, &result.observed_input));
        }
        if !result.observed_output.is_empty() {
            println!("  out: {}", join_paths(&state, &result.observed_output));
        }
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    env_logger::init();
    let args: Args = argh::from_env();
    match args.cmd {
        Cmd::Graph(args) => dump_graph(Utf8Path::new(&args.path)),
        Cmd::Results(args) => dump_results(Utf8Path::new(&args.path)),
    }
}

fn main() {
    let exit_code = match run() {
        Ok(_) => 0,
        Err(err) => {
            println!("bog: error: {}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
