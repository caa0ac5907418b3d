//! The operation graph: deduplicated build commands and the dependency
//! edges inferred between them.

use crate::fs_state::FileId;
use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use std::fmt;

/// Identifies an operation within a graph. Ids are handed out
/// sequentially starting at 1; 0 is reserved as "no operation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u32);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of an executable command: where it runs, what runs, and
/// with which arguments. A graph never holds two operations with an equal
/// CommandInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommandInfo {
    pub working_directory: Utf8PathBuf,
    pub executable: Utf8PathBuf,
    pub arguments: Vec<String>,
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.working_directory, self.executable)?;
        for arg in &self.arguments {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One node of the graph: a declared build step plus the dependency state
/// inferred for it during generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub id: OperationId,
    /// Display name, used in logs and error messages.
    pub title: String,
    pub command: CommandInfo,
    pub declared_input: Vec<FileId>,
    pub declared_output: Vec<FileId>,
    /// The read sandbox roots this operation actually needs, in first-use
    /// order; a subset of the configured roots.
    pub read_access: Vec<FileId>,
    /// Write counterpart of read_access.
    pub write_access: Vec<FileId>,
    /// Operations that may only run after this one, deduplicated.
    pub children: Vec<OperationId>,
    /// How many parents gate this operation. A scheduler counts these
    /// down; roots are stored with a synthetic count of 1 that the run
    /// itself satisfies.
    pub dependency_count: u32,
}

impl OperationInfo {
    pub fn new(
        id: OperationId,
        title: String,
        command: CommandInfo,
        declared_input: Vec<FileId>,
        declared_output: Vec<FileId>,
        read_access: Vec<FileId>,
        write_access: Vec<FileId>,
    ) -> Self {
        OperationInfo {
            id,
            title,
            command,
            declared_input,
            declared_output,
            read_access,
            write_access,
            children: Vec::new(),
            dependency_count: 0,
        }
    }
}

/// All operations of one build, indexed by id and by command identity,
/// along with the root set and the path table that travels with the graph
/// when it is persisted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OperationGraph {
    /// (id, canonical absolute path) for every file id the operations
    /// reference. Only meaningful on the load/save boundary; rebuilt from
    /// scratch on every save.
    referenced_files: Vec<(FileId, Utf8PathBuf)>,
    root_operation_ids: Vec<OperationId>,
    operations: FxHashMap<OperationId, OperationInfo>,
    /// Dedup index, kept in sync with `operations` by add_operation.
    by_command: FxHashMap<CommandInfo, OperationId>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn referenced_files(&self) -> &[(FileId, Utf8PathBuf)] {
        &self.referenced_files
    }

    pub fn set_referenced_files(&mut self, files: Vec<(FileId, Utf8PathBuf)>) {
        self.referenced_files = files;
    }

    pub fn root_operation_ids(&self) -> &[OperationId] {
        &self.root_operation_ids
    }

    pub fn set_root_operation_ids(&mut self, ids: Vec<OperationId>) {
        self.root_operation_ids = ids;
    }

    pub fn operations(&self) -> &FxHashMap<OperationId, OperationInfo> {
        &self.operations
    }

    /// Operation ids in ascending order, the order operations are written
    /// to disk in.
    pub fn sorted_operation_ids(&self) -> Vec<OperationId> {
        let mut ids: Vec<OperationId> = self.operations.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Insert a new operation. Callers check uniqueness beforehand, so a
    /// duplicate id or command here is a corrupted graph.
    pub fn add_operation(&mut self, op: OperationInfo) {
        let id = op.id;
        match self.by_command.insert(op.command.clone(), id) {
            None => {}
            Some(prev) => panic!("operations {} and {} share a command", prev, id),
        }
        match self.operations.insert(id, op) {
            None => {}
            Some(_) => panic!("duplicate operation id {}", id),
        }
    }

    pub fn has_command(&self, command: &CommandInfo) -> bool {
        self.by_command.contains_key(command)
    }

    pub fn try_find_operation(&self, command: &CommandInfo) -> Option<&OperationInfo> {
        self.by_command.get(command).map(|id| self.operation(*id))
    }

    /// Look up an operation that must exist. A miss means the graph is
    /// corrupted, so this panics rather than returning an error.
    pub fn operation(&self, id: OperationId) -> &OperationInfo {
        match self.operations.get(&id) {
            Some(op) => op,
            None => panic!("operation graph missing operation {}", id),
        }
    }

    pub(crate) fn operation_mut(&mut self, id: OperationId) -> &mut OperationInfo {
        match self.operations.get_mut(&id) {
            Some(op) => op,
            None => panic!("operation graph missing operation {}", id),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u32, title: &str, args: &[&str]) -> OperationInfo {
        OperationInfo::new(
            OperationId(id),
            title.to_owned(),
            CommandInfo {
                working_directory: Utf8PathBuf::from("/w"),
                executable: Utf8PathBuf::from("cc"),
                arguments: args.iter().map(|a| a.to_string()).collect(),
            },
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn add_and_find() {
        let mut graph = OperationGraph::new();
        graph.add_operation(op(1, "compile a", &["-c", "a.cpp"]));
        graph.add_operation(op(2, "compile b", &["-c", "b.cpp"]));

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.operation(OperationId(1)).title, "compile a");

        let probe = op(0, "ignored", &["-c", "b.cpp"]).command;
        assert!(graph.has_command(&probe));
        assert_eq!(
            graph.try_find_operation(&probe).map(|o| o.id),
            Some(OperationId(2))
        );

        let other = op(0, "ignored", &["-c", "c.cpp"]).command;
        assert!(!graph.has_command(&other));
        assert!(graph.try_find_operation(&other).is_none());
    }

    #[test]
    fn sorted_ids() {
        let mut graph = OperationGraph::new();
        graph.add_operation(op(3, "c", &["3"]));
        graph.add_operation(op(1, "a", &["1"]));
        graph.add_operation(op(2, "b", &["2"]));
        assert_eq!(
            graph.sorted_operation_ids(),
            vec![OperationId(1), OperationId(2), OperationId(3)]
        );
    }

    #[test]
    #[should_panic(expected = "share a command")]
    fn duplicate_command_panics() {
        let mut graph = OperationGraph::new();
        graph.add_operation(op(1, "a", &["-c", "a.cpp"]));
        graph.add_operation(op(2, "b", &["-c", "a.cpp"]));
    }

    #[test]
    #[should_panic(expected = "missing operation")]
    fn missing_operation_panics() {
        let graph = OperationGraph::new();
        graph.operation(OperationId(1));
    }
}
