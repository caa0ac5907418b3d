//! Path canonicalization.
//!
//! All paths in the graph are compared lexically: we never ask the disk
//! what a path "really" is. Directory identity is carried by a trailing
//! slash, so "obj/" and "obj" intern to different ids and must stay
//! distinct through canonicalization.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Returns true if this path names a directory ("obj/") rather than a
/// file ("obj").
pub fn is_dir_path(path: &Utf8Path) -> bool {
    let s = path.as_str();
    s.ends_with('/') || s == "." || s.ends_with("/.")
}

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar", keeping the trailing slash of directory
/// paths intact.
pub fn canon_path(path: &Utf8Path) -> Utf8PathBuf {
    let want_dir = is_dir_path(path);
    let mut out = Utf8PathBuf::new();
    // Components that a ".." can pop; root and leading ".." cannot be.
    let mut poppable = 0;
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => out.push(component),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if poppable > 0 {
                    out.pop();
                    poppable -= 1;
                } else {
                    out.push("..");
                }
            }
            Utf8Component::Normal(name) => {
                out.push(name);
                poppable += 1;
            }
        }
    }
    if want_dir && !out.as_str().is_empty() && !out.as_str().ends_with('/') {
        let mut s = out.into_string();
        s.push('/');
        out = Utf8PathBuf::from(s);
    }
    out
}

/// Make a declared path absolute relative to an operation's working
/// directory, then canonicalize it.
pub fn resolve(path: &Utf8Path, working_directory: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        canon_path(path)
    } else {
        canon_path(&working_directory.join(path))
    }
}

/// Iterate the enclosing directories of a canonical path, nearest first,
/// in the trailing-slash form used for directory identity:
/// "/w/obj/a.o" yields "/w/obj/", "/w/", "/".
pub fn parent_directories(path: &Utf8Path) -> impl Iterator<Item = Utf8PathBuf> + '_ {
    std::iter::successors(path.parent(), |dir| dir.parent())
        .take_while(|dir| !dir.as_str().is_empty())
        .map(|dir| {
            if dir.as_str().ends_with('/') {
                dir.to_owned()
            } else {
                let mut s = dir.as_str().to_owned();
                s.push('/');
                Utf8PathBuf::from(s)
            }
        })
}
