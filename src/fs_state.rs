//! The file system identity table: canonical absolute paths interned to
//! small ids.
//!
//! Ids are only meaningful within the process that minted them. Persisted
//! graphs and results carry a (stored id, path) table instead and get
//! remapped through the current table on load.

use crate::canon;
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;

/// Identifies a file path within the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bidirectional path <-> id table. Lookups by id are a Vec index;
/// lookups by path go through a hash of the canonical string. The key is
/// the string, not the path: component-wise path equality would merge
/// the directory spelling "obj/" with the file spelling "obj", and those
/// must stay distinct ids.
#[derive(Debug, Default)]
pub struct FileSystemState {
    files: Vec<Utf8PathBuf>,
    by_path: FxHashMap<String, FileId>,
}

impl FileSystemState {
    pub fn new() -> Self {
        Default::default()
    }

    /// Intern an absolute path, canonicalizing it first. Interning the
    /// same path twice yields the same id.
    pub fn file_id(&mut self, path: &Utf8Path) -> FileId {
        self.intern(canon::canon_path(path))
    }

    /// Resolve a batch of declared paths against a working directory and
    /// intern them in declaration order.
    pub fn file_ids(&mut self, paths: &[Utf8PathBuf], working_directory: &Utf8Path) -> Vec<FileId> {
        paths
            .iter()
            .map(|path| self.intern(canon::resolve(path, working_directory)))
            .collect()
    }

    fn intern(&mut self, path: Utf8PathBuf) -> FileId {
        debug_assert!(path.is_absolute(), "interning relative path {:?}", path);
        match self.by_path.get(path.as_str()) {
            Some(&id) => id,
            None => {
                let id = FileId(self.files.len() as u32);
                self.by_path.insert(path.as_str().to_owned(), id);
                self.files.push(path);
                id
            }
        }
    }

    /// The path behind an id. Ids are only minted by this table, so a
    /// miss means the graph holding the id is corrupted; panic.
    pub fn path(&self, id: FileId) -> &Utf8Path {
        &self.files[id.index()]
    }

    pub fn lookup(&self, path: &Utf8Path) -> Option<FileId> {
        self.by_path.get(canon::canon_path(path).as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Rewrite ids minted against a stored file table into the current
/// process's ids. Every id must appear in the map; a gap means the stored
/// file was corrupt in a way its codec failed to notice.
pub(crate) fn remap_file_ids(ids: &mut [FileId], map: &FxHashMap<FileId, FileId>) {
    for id in ids.iter_mut() {
        match map.get(id) {
            Some(&current) => *id = current,
            None => panic!("file id {:?} missing from referenced files table", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedups() {
        let mut state = FileSystemState::new();
        let a = state.file_id(Utf8Path::new("/w/a.cpp"));
        let b = state.file_id(Utf8Path::new("/w/b.cpp"));
        assert_ne!(a, b);
        assert_eq!(state.file_id(Utf8Path::new("/w/a.cpp")), a);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn intern_canonicalizes() {
        let mut state = FileSystemState::new();
        let a = state.file_id(Utf8Path::new("/w/x/../a.cpp"));
        assert_eq!(state.file_id(Utf8Path::new("/w/a.cpp")), a);
        assert_eq!(state.path(a).as_str(), "/w/a.cpp");
    }

    #[test]
    fn dir_and_file_are_distinct() {
        let mut state = FileSystemState::new();
        let dir = state.file_id(Utf8Path::new("/w/obj/"));
        let file = state.file_id(Utf8Path::new("/w/obj"));
        assert_ne!(dir, file);
        assert_eq!(state.path(dir).as_str(), "/w/obj/");
        assert_eq!(state.path(file).as_str(), "/w/obj");
    }

    #[test]
    fn lookup_does_not_intern() {
        let mut state = FileSystemState::new();
        assert_eq!(state.lookup(Utf8Path::new("/w/a.cpp")), None);
        let a = state.file_id(Utf8Path::new("/w/a.cpp"));
        assert_eq!(state.lookup(Utf8Path::new("/w/./a.cpp")), Some(a));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn batch_resolves_against_working_directory() {
        let mut state = FileSystemState::new();
        let ids = state.file_ids(
            &[Utf8PathBuf::from("a.cpp"), Utf8PathBuf::from("/out/a.o")],
            Utf8Path::new("/w"),
        );
        assert_eq!(state.path(ids[0]).as_str(), "/w/a.cpp");
        assert_eq!(state.path(ids[1]).as_str(), "/out/a.o");
    }

    #[test]
    fn remap_rewrites_in_place() {
        let mut map = FxHashMap::default();
        map.insert(FileId(0), FileId(7));
        map.insert(FileId(1), FileId(3));
        let mut ids = vec![FileId(1), FileId(0), FileId(1)];
        remap_file_ids(&mut ids, &map);
        assert_eq!(ids, vec![FileId(3), FileId(7), FileId(3)]);
    }

    #[test]
    #[should_panic]
    fn remap_panics_on_unknown_id() {
        let map = FxHashMap::default();
        let mut ids = vec![FileId(0)];
        remap_file_ids(&mut ids, &map);
    }
}
