//! Incremental construction of the operation graph.
//!
//! The task layer declares one operation at a time; we validate its
//! sandbox access, intern its paths, and infer dependency edges purely
//! from declared input/output overlap. Nothing here declares an edge
//! explicitly. Edges in both directions are possible: an operation can
//! arrive before the producer of its inputs does.
//!
//! Any error abandons the whole generation pass, so nothing rolls back;
//! validation happens before the operation is committed anywhere.

use crate::canon;
use crate::fs_state::{FileId, FileSystemState};
use crate::graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::hash_map::Entry;
use std::fmt;
use thiserror::Error;

/// Which half of the sandbox a path was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        })
    }
}

/// A mistake in the declared build. These are configuration errors
/// reported back to whoever declared the operation, not invariant
/// violations.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("working directory must be absolute: {0}")]
    RelativeWorkingDirectory(Utf8PathBuf),
    #[error("operation already exists with the same command: {0}")]
    DuplicateCommand(CommandInfo),
    #[error("operation does not have permission to {access} {path}")]
    AccessDenied { access: AccessKind, path: Utf8PathBuf },
    #[error("{path} is already written by operation \"{existing}\"")]
    MultipleWriters { path: Utf8PathBuf, existing: String },
    #[error("operation \"{title}\" creates a circular dependency")]
    CircularDependency { title: String },
}

/// Builds an OperationGraph one declared operation at a time, keeping
/// enough bookkeeping to infer edges and reject cycles as they appear.
pub struct OperationGraphGenerator<'a> {
    state: &'a mut FileSystemState,
    read_access: Vec<Utf8PathBuf>,
    write_access: Vec<Utf8PathBuf>,
    graph: OperationGraph,
    unique_id: u32,
    /// Sole producer of each file-shaped output.
    output_files: FxHashMap<FileId, OperationId>,
    /// Sole producer of each directory-shaped output.
    output_directories: FxHashMap<FileId, OperationId>,
    /// Every consumer of each file-shaped input, in declaration order.
    input_files: FxHashMap<FileId, Vec<OperationId>>,
}

impl<'a> OperationGraphGenerator<'a> {
    /// Start a generation pass. The access vectors are the absolute
    /// sandbox roots operations may read from and write under.
    pub fn new(
        state: &'a mut FileSystemState,
        read_access: Vec<Utf8PathBuf>,
        write_access: Vec<Utf8PathBuf>,
    ) -> Self {
        let read_access: Vec<Utf8PathBuf> =
            read_access.iter().map(|p| canon::canon_path(p)).collect();
        let write_access: Vec<Utf8PathBuf> =
            write_access.iter().map(|p| canon::canon_path(p)).collect();
        debug_assert!(
            read_access.iter().chain(&write_access).all(|p| p.is_absolute()),
            "sandbox roots must be absolute"
        );
        for root in read_access.iter().chain(&write_access) {
            state.file_id(root);
        }
        OperationGraphGenerator {
            state,
            read_access,
            write_access,
            graph: OperationGraph::new(),
            unique_id: 0,
            output_files: FxHashMap::default(),
            output_directories: FxHashMap::default(),
            input_files: FxHashMap::default(),
        }
    }

    /// Declare one build step. Inputs and outputs may be relative to the
    /// working directory; a trailing slash marks a directory. Returns the
    /// id of the new operation, with all edges against previously
    /// declared operations already in place.
    pub fn create_operation(
        &mut self,
        title: &str,
        executable: &Utf8Path,
        arguments: Vec<String>,
        working_directory: &Utf8Path,
        declared_input: &[Utf8PathBuf],
        declared_output: &[Utf8PathBuf],
    ) -> Result<OperationId, GenerateError> {
        if !working_directory.is_absolute() {
            return Err(GenerateError::RelativeWorkingDirectory(
                working_directory.to_owned(),
            ));
        }

        let command = CommandInfo {
            working_directory: working_directory.to_owned(),
            executable: executable.to_owned(),
            arguments,
        };
        if self.graph.has_command(&command) {
            return Err(GenerateError::DuplicateCommand(command));
        }

        let input_paths = resolve_all(declared_input, working_directory);
        let output_paths = resolve_all(declared_output, working_directory);
        let read_roots = check_access(&self.read_access, &input_paths, AccessKind::Read)?;
        let write_roots = check_access(&self.write_access, &output_paths, AccessKind::Write)?;

        let mut read_access = Vec::with_capacity(read_roots.len());
        for root in read_roots {
            read_access.push(self.state.file_id(root));
        }
        let mut write_access = Vec::with_capacity(write_roots.len());
        for root in write_roots {
            write_access.push(self.state.file_id(root));
        }
        let mut input_ids = Vec::with_capacity(input_paths.len());
        for path in &input_paths {
            input_ids.push(self.state.file_id(path));
        }
        let mut output_ids = Vec::with_capacity(output_paths.len());
        for path in &output_paths {
            output_ids.push(self.state.file_id(path));
        }

        self.unique_id += 1;
        let id = OperationId(self.unique_id);
        self.graph.add_operation(OperationInfo::new(
            id,
            title.to_owned(),
            command,
            input_ids.clone(),
            output_ids.clone(),
            read_access,
            write_access,
        ));

        // Register the new operation's outputs and inputs before edge
        // inference, so an operation that consumes its own output links
        // to itself and falls out as a cycle below.
        for (&file, path) in output_ids.iter().zip(&output_paths) {
            let producers = if canon::is_dir_path(path) {
                &mut self.output_directories
            } else {
                &mut self.output_files
            };
            register_sole_producer(producers, &self.graph, file, id, path)?;
        }
        for (&file, path) in input_ids.iter().zip(&input_paths) {
            if !canon::is_dir_path(path) {
                self.input_files.entry(file).or_default().push(id);
            }
        }

        // Run after whatever produces our inputs. A file id lands in at
        // most one of the two registries, so both are consulted.
        for file in &input_ids {
            if let Some(&producer) = self
                .output_files
                .get(file)
                .or_else(|| self.output_directories.get(file))
            {
                link(&mut self.graph, producer, id);
            }
        }
        // Anything already consuming one of our outputs runs after us,
        // even though it was declared first.
        for file in &output_ids {
            if let Some(consumers) = self.input_files.get(file) {
                for &consumer in consumers {
                    link(&mut self.graph, id, consumer);
                }
            }
        }
        // A directory produced by another operation must exist before we
        // write anything beneath it. An operation may produce a directory
        // and files under it itself; that is not an ordering edge.
        for path in &output_paths {
            for dir in canon::parent_directories(path) {
                if let Some(dir_file) = self.state.lookup(&dir) {
                    if let Some(&producer) = self.output_directories.get(&dir_file) {
                        if producer != id {
                            link(&mut self.graph, producer, id);
                        }
                    }
                }
            }
        }

        if self.creates_cycle(id) {
            return Err(GenerateError::CircularDependency {
                title: title.to_owned(),
            });
        }
        Ok(id)
    }

    /// True if the new operation can reach itself through its children.
    /// Worklist instead of recursion; generated graphs get deep.
    fn creates_cycle(&self, id: OperationId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = self.graph.operation(id).children.clone();
        while let Some(next) = stack.pop() {
            if next == id {
                return true;
            }
            if visited.insert(next) {
                stack.extend(self.graph.operation(next).children.iter().copied());
            }
        }
        false
    }

    /// Finish the pass: mark roots and transitively reduce the graph.
    /// The generator is consumed; the graph is ready to persist.
    pub fn finalize_graph(mut self) -> OperationGraph {
        finalize(&mut self.graph);
        self.graph
    }
}

fn resolve_all(paths: &[Utf8PathBuf], working_directory: &Utf8Path) -> Vec<Utf8PathBuf> {
    paths
        .iter()
        .map(|path| canon::resolve(path, working_directory))
        .collect()
}

/// Check every path against the permitted roots. Returns the roots
/// actually used, in first-use order; they are recorded on the operation
/// so the executor can sandbox it tightly.
fn check_access<'a>(
    roots: &'a [Utf8PathBuf],
    paths: &[Utf8PathBuf],
    access: AccessKind,
) -> Result<Vec<&'a Utf8PathBuf>, GenerateError> {
    let mut used: Vec<&Utf8PathBuf> = Vec::new();
    for path in paths {
        match roots.iter().find(|root| path.starts_with(root)) {
            Some(root) => {
                // Compare spellings, as the identity table does.
                if !used.iter().any(|u| u.as_str() == root.as_str()) {
                    used.push(root);
                }
            }
            None => {
                return Err(GenerateError::AccessDenied {
                    access,
                    path: path.clone(),
                })
            }
        }
    }
    Ok(used)
}

fn register_sole_producer(
    producers: &mut FxHashMap<FileId, OperationId>,
    graph: &OperationGraph,
    file: FileId,
    id: OperationId,
    path: &Utf8Path,
) -> Result<(), GenerateError> {
    match producers.entry(file) {
        Entry::Vacant(entry) => {
            entry.insert(id);
            Ok(())
        }
        Entry::Occupied(entry) => Err(GenerateError::MultipleWriters {
            path: path.to_owned(),
            existing: graph.operation(*entry.get()).title.clone(),
        }),
    }
}

/// Add parent -> child unless it is already there; the child's dependency
/// count only moves on first insertion.
fn link(graph: &mut OperationGraph, parent: OperationId, child: OperationId) {
    let parent_op = graph.operation_mut(parent);
    if parent_op.children.contains(&child) {
        return;
    }
    parent_op.children.push(child);
    graph.operation_mut(child).dependency_count += 1;
}

/// Mark root operations and transitively reduce the edge set. Idempotent:
/// running it again finds no zero-count operations and no redundant
/// edges.
fn finalize(graph: &mut OperationGraph) {
    let ids = graph.sorted_operation_ids();

    // Anything that never picked up a parent is a root. The synthetic
    // count of 1 is what the run itself satisfies when it kicks the
    // roots off.
    let mut roots = graph.root_operation_ids().to_vec();
    for &id in &ids {
        let op = graph.operation_mut(id);
        if op.dependency_count == 0 {
            op.dependency_count = 1;
            roots.push(id);
        }
    }
    graph.set_root_operation_ids(roots);

    // Drop any edge to a child that is also reachable through a sibling;
    // the scheduling order it encodes is already implied.
    let closures = descendant_closures(graph, &ids);
    for &id in &ids {
        let children = graph.operation(id).children.clone();
        let redundant: Vec<OperationId> = children
            .iter()
            .copied()
            .filter(|&child| {
                children
                    .iter()
                    .any(|&sibling| sibling != child && closures[&sibling].contains(&child))
            })
            .collect();
        if redundant.is_empty() {
            continue;
        }
        graph
            .operation_mut(id)
            .children
            .retain(|child| !redundant.contains(child));
        for child in redundant {
            graph.operation_mut(child).dependency_count -= 1;
        }
    }
}

/// Every operation reachable from each operation through children.
/// Iterative post-order over the (acyclic) graph: a node's closure is the
/// union of its children and their closures.
fn descendant_closures(
    graph: &OperationGraph,
    ids: &[OperationId],
) -> FxHashMap<OperationId, FxHashSet<OperationId>> {
    let mut closures: FxHashMap<OperationId, FxHashSet<OperationId>> = FxHashMap::default();
    let mut queued = FxHashSet::default();
    for &start in ids {
        if closures.contains_key(&start) {
            continue;
        }
        let mut stack = vec![(start, false)];
        while let Some((id, expand)) = stack.pop() {
            if expand {
                let children = &graph.operation(id).children;
                let mut closure = FxHashSet::default();
                for &child in children {
                    closure.insert(child);
                    // Cycles were rejected at creation, so the child's
                    // closure is always finished by now.
                    closure.extend(closures[&child].iter().copied());
                }
                closures.insert(id, closure);
            } else {
                if closures.contains_key(&id) || !queued.insert(id) {
                    continue;
                }
                stack.push((id, true));
                for &child in &graph.operation(id).children {
                    if !closures.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }
    }
    closures
}
