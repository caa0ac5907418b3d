//! The persisted operation graph, format "BOG" version 6.
//!
//! Layout, all integers little-endian, strings u32-length-prefixed:
//!   "BOG\0" u32:version
//!   "FIS\0" u32:count, then per file: u32:id, string:path
//!   "ROP\0" u32:count, then u32 per root operation id
//!   "OPS\0" u32:count, then each operation (see read_operation)
//!
//! The file ids inside are local to the stored table; load() remaps them
//! through the current process's identity table before handing the graph
//! out. Stored graphs are caches: losing one to corruption just costs a
//! cold start, so load never fails, it only returns None.

use crate::codec::{ParseResult, Reader, Writer};
use crate::fs_state::{remap_file_ids, FileId, FileSystemState};
use crate::graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};
use anyhow::anyhow;
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::{FxHashMap, FxHashSet};

const FILE_MAGIC: &[u8; 4] = b"BOG\0";
const FILE_VERSION: u32 = 6;
const FILES_TAG: &[u8; 4] = b"FIS\0";
const ROOTS_TAG: &[u8; 4] = b"ROP\0";
const OPERATIONS_TAG: &[u8; 4] = b"OPS\0";

/// Decode a stored graph. File ids in the result are still the stored
/// ones; callers other than load() rarely want this directly.
pub fn read(buf: &[u8]) -> ParseResult<OperationGraph> {
    let mut r = Reader::new(buf);
    r.expect_tag(FILE_MAGIC)?;
    let version = r.read_u32()?;
    if version != FILE_VERSION {
        return r.parse_error(format!("unsupported operation graph version {}", version));
    }

    let mut graph = OperationGraph::new();

    r.expect_tag(FILES_TAG)?;
    let file_count = r.read_u32()?;
    let mut files = Vec::new();
    let mut seen = FxHashSet::default();
    for _ in 0..file_count {
        let id = FileId(r.read_u32()?);
        if !seen.insert(id) {
            return r.parse_error(format!("duplicate file id {}", id.0));
        }
        let path = Utf8PathBuf::from(r.read_string()?);
        files.push((id, path));
    }
    graph.set_referenced_files(files);

    r.expect_tag(ROOTS_TAG)?;
    let root_count = r.read_u32()?;
    let mut roots = Vec::new();
    for _ in 0..root_count {
        roots.push(OperationId(r.read_u32()?));
    }
    graph.set_root_operation_ids(roots);

    r.expect_tag(OPERATIONS_TAG)?;
    let op_count = r.read_u32()?;
    for _ in 0..op_count {
        let op = read_operation(&mut r)?;
        if op.id == OperationId(0) {
            return r.parse_error("operation id 0 is reserved");
        }
        if graph.operations().contains_key(&op.id) {
            return r.parse_error(format!("duplicate operation id {}", op.id));
        }
        if graph.has_command(&op.command) {
            return r.parse_error(format!("duplicate command: {}", op.command));
        }
        graph.add_operation(op);
    }
    r.expect_eof()?;
    Ok(graph)
}

fn read_operation(r: &mut Reader) -> ParseResult<OperationInfo> {
    let id = OperationId(r.read_u32()?);
    let title = r.read_string()?;
    let working_directory = Utf8PathBuf::from(r.read_string()?);
    let executable = Utf8PathBuf::from(r.read_string()?);
    let arg_count = r.read_u32()?;
    let mut arguments = Vec::new();
    for _ in 0..arg_count {
        arguments.push(r.read_string()?);
    }
    let declared_input = read_file_ids(r)?;
    let declared_output = read_file_ids(r)?;
    let read_access = read_file_ids(r)?;
    let write_access = read_file_ids(r)?;
    let child_count = r.read_u32()?;
    let mut children = Vec::new();
    for _ in 0..child_count {
        children.push(OperationId(r.read_u32()?));
    }
    let dependency_count = r.read_u32()?;

    let mut op = OperationInfo::new(
        id,
        title,
        CommandInfo {
            working_directory,
            executable,
            arguments,
        },
        declared_input,
        declared_output,
        read_access,
        write_access,
    );
    op.children = children;
    op.dependency_count = dependency_count;
    Ok(op)
}

fn read_file_ids(r: &mut Reader) -> ParseResult<Vec<FileId>> {
    let count = r.read_u32()?;
    let mut ids = Vec::new();
    for _ in 0..count {
        ids.push(FileId(r.read_u32()?));
    }
    Ok(ids)
}

/// Encode a graph. Operations go out in ascending id order so equal
/// graphs produce identical bytes.
pub fn write(graph: &OperationGraph) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_tag(FILE_MAGIC);
    w.write_u32(FILE_VERSION);

    w.write_tag(FILES_TAG);
    w.write_u32(graph.referenced_files().len() as u32);
    for (id, path) in graph.referenced_files() {
        w.write_u32(id.0);
        w.write_string(path.as_str());
    }

    w.write_tag(ROOTS_TAG);
    w.write_u32(graph.root_operation_ids().len() as u32);
    for id in graph.root_operation_ids() {
        w.write_u32(id.0);
    }

    w.write_tag(OPERATIONS_TAG);
    let ids = graph.sorted_operation_ids();
    w.write_u32(ids.len() as u32);
    for id in ids {
        write_operation(&mut w, graph.operation(id));
    }
    w.finish()
}

fn write_operation(w: &mut Writer, op: &OperationInfo) {
    w.write_u32(op.id.0);
    w.write_string(&op.title);
    w.write_string(op.command.working_directory.as_str());
    w.write_string(op.command.executable.as_str());
    w.write_u32(op.command.arguments.len() as u32);
    for arg in &op.command.arguments {
        w.write_string(arg);
    }
    write_file_ids(w, &op.declared_input);
    write_file_ids(w, &op.declared_output);
    write_file_ids(w, &op.read_access);
    write_file_ids(w, &op.write_access);
    w.write_u32(op.children.len() as u32);
    for child in &op.children {
        w.write_u32(child.0);
    }
    w.write_u32(op.dependency_count);
}

fn write_file_ids(w: &mut Writer, ids: &[FileId]) {
    w.write_u32(ids.len() as u32);
    for id in ids {
        w.write_u32(id.0);
    }
}

/// Load the graph cache, remapping its file ids into `state`. Missing
/// file means a first run; anything unreadable or unparsable is logged
/// and dropped. Either way None means "start from nothing".
pub fn load(path: &Utf8Path, state: &mut FileSystemState) -> Option<OperationGraph> {
    let buf = match std::fs::read(path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no operation graph at {}, starting fresh", path);
            return None;
        }
        Err(err) => {
            log::error!("read {}: {}", path, err);
            return None;
        }
    };
    let mut graph = match read(&buf) {
        Ok(graph) => graph,
        Err(err) => {
            log::error!("corrupt operation graph {}: {}; discarding it", path, err);
            return None;
        }
    };
    remap(&mut graph, state);
    Some(graph)
}

/// Rewrite every stored file id to the current process's id for the same
/// path.
fn remap(graph: &mut OperationGraph, state: &mut FileSystemState) {
    let mut map = FxHashMap::default();
    let mut files = Vec::with_capacity(graph.referenced_files().len());
    for (stored, path) in graph.referenced_files() {
        let current = state.file_id(path);
        map.insert(*stored, current);
        files.push((current, path.clone()));
    }
    for id in graph.sorted_operation_ids() {
        let op = graph.operation_mut(id);
        remap_file_ids(&mut op.declared_input, &map);
        remap_file_ids(&mut op.declared_output, &map);
        remap_file_ids(&mut op.read_access, &map);
        remap_file_ids(&mut op.write_access, &map);
    }
    graph.set_referenced_files(files);
}

/// Write the graph cache, replacing whatever was there. The stored file
/// table is recomputed first so it holds exactly the ids the operations
/// reference, in ascending order.
pub fn save(
    path: &Utf8Path,
    graph: &mut OperationGraph,
    state: &FileSystemState,
) -> anyhow::Result<()> {
    let mut used = FxHashSet::default();
    for op in graph.operations().values() {
        used.extend(op.declared_input.iter().copied());
        used.extend(op.declared_output.iter().copied());
        used.extend(op.read_access.iter().copied());
        used.extend(op.write_access.iter().copied());
    }
    let mut ids: Vec<FileId> = used.into_iter().collect();
    ids.sort();
    let files = ids
        .into_iter()
        .map(|id| (id, state.path(id).to_owned()))
        .collect();
    graph.set_referenced_files(files);

    let buf = write(graph);
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("create {}: {}", parent, err))?;
        }
    }
    std::fs::write(path, buf).map_err(|err| anyhow!("write {}: {}", path, err))?;
    log::debug!(
        "wrote operation graph {} ({} operations)",
        path,
        graph.len()
    );
    Ok(())
}
