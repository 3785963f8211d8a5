//! Path-resolving traversal (spec.md §4.2, redesign note §9: an iterative
//! component walk over a single split, replacing the source's recursive
//! `creeper`/`sweeper`/`peeper`/`seeper`/`lister` which re-split and
//! re-join path substrings at every recursion level).

use crate::error::{CoreError, Result};
use crate::fs::inode::{Inode, WUSR};

/// Split `path` on `/`, dropping the leading and trailing empty components
/// produced by a leading or trailing slash. `"/"` and `""` both yield no
/// components (the root itself).
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Descend from `root`, requiring every intermediate component to be a
/// directory (spec.md §4.2 `traverse`).
pub fn traverse<'a>(root: &'a Inode, path: &str) -> Result<&'a Inode> {
    let parts = components(path);
    let mut node = root;
    for (i, name) in parts.iter().enumerate() {
        let children = node.children().ok_or(CoreError::NotADirectory)?;
        node = children.get(*name).ok_or(CoreError::NotFound)?;
        if i + 1 < parts.len() && !node.is_directory() {
            return Err(CoreError::NotADirectory);
        }
    }
    Ok(node)
}

pub fn traverse_mut<'a>(root: &'a mut Inode, path: &str) -> Result<&'a mut Inode> {
    let parts = components(path);
    let mut node = root;
    for (i, name) in parts.iter().enumerate() {
        let children = node.children_mut().ok_or(CoreError::NotADirectory)?;
        node = children.get_mut(*name).ok_or(CoreError::NotFound)?;
        if i + 1 < parts.len() && !node.is_directory() {
            return Err(CoreError::NotADirectory);
        }
    }
    Ok(node)
}

/// Like `traverse` but reports a missing terminal component as `false`
/// rather than `NotFound` (spec.md §4.2 `exists`).
pub fn exists(root: &Inode, path: &str) -> Result<bool> {
    match traverse(root, path) {
        Ok(_) => Ok(true),
        Err(CoreError::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove the terminal child of `path`, requiring the write bit on its
/// containing directory (spec.md §4.2 `remove`).
pub fn remove(root: &mut Inode, path: &str) -> Result<Inode> {
    let parts = components(path);
    let (leaf, parent_parts) = parts.split_last().ok_or(CoreError::NotFound)?;
    let parent = traverse_path_mut(root, parent_parts)?;
    if parent.stat().mode & WUSR == 0 {
        return Err(CoreError::PermissionDenied);
    }
    let children = parent.children_mut().ok_or(CoreError::NotADirectory)?;
    children.remove(*leaf).ok_or(CoreError::NotFound)
}

/// Walk the prefix of `path`, auto-creating missing intermediate
/// directories with permissive default mode and the deepest existing
/// ancestor's owner/group, then insert `value` as the terminal child
/// (spec.md §4.2 `insert_along(path‖"~", value)`). Updates `atime` on
/// every directory visited and `mtime` on every one mutated.
pub fn insert_along(root: &mut Inode, path: &str, value: Inode) -> Result<()> {
    let parts = components(path);
    let (leaf, parent_parts) = parts.split_last().ok_or(CoreError::NotFound)?;
    let mut node = root;
    for name in parent_parts {
        node.stat_mut().touch_atime();
        if node.stat().mode & WUSR == 0 {
            return Err(CoreError::PermissionDenied);
        }
        let (uid, gid) = (node.stat().uid, node.stat().gid);
        let children = node.children_mut().ok_or(CoreError::NotADirectory)?;
        if !children.contains_key(*name) {
            let mode = crate::fs::inode::DEFAULT_DIR_MODE;
            children.insert((*name).to_string(), Inode::new_dir(mode, uid, gid));
            node.stat_mut().touch_mtime();
        }
        let children = node.children_mut().ok_or(CoreError::NotADirectory)?;
        node = children.get_mut(*name).ok_or(CoreError::NotFound)?;
        if !node.is_directory() {
            return Err(CoreError::NotADirectory);
        }
    }
    node.stat_mut().touch_atime();
    if node.stat().mode & WUSR == 0 {
        return Err(CoreError::PermissionDenied);
    }
    let children = node.children_mut().ok_or(CoreError::NotADirectory)?;
    children.insert((*leaf).to_string(), value);
    node.stat_mut().touch_mtime();
    Ok(())
}

/// Child names of the directory at `path`, excluding reserved fields
/// (spec.md §4.2 `list`; the source's key-type filter has no equivalent
/// here since reserved fields are no longer children of the same map).
pub fn list(root: &Inode, path: &str) -> Result<Vec<String>> {
    let node = traverse(root, path)?;
    let children = node.children().ok_or(CoreError::NotADirectory)?;
    Ok(children.keys().cloned().collect())
}

fn traverse_path_mut<'a>(root: &'a mut Inode, parts: &[&str]) -> Result<&'a mut Inode> {
    let mut node = root;
    for name in parts {
        let children = node.children_mut().ok_or(CoreError::NotADirectory)?;
        node = children.get_mut(*name).ok_or(CoreError::NotFound)?;
        if !node.is_directory() {
            return Err(CoreError::NotADirectory);
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inode::{Inode, DEFAULT_DIR_MODE, REGF};

    fn root() -> Inode {
        Inode::new_dir(DEFAULT_DIR_MODE, 0, 0)
    }

    #[test]
    fn insert_along_creates_missing_intermediates() {
        let mut r = root();
        insert_along(&mut r, "/a/b/c", Inode::new_file(REGF | 0o644, 0, 0)).unwrap();
        assert!(exists(&r, "/a").unwrap());
        assert!(exists(&r, "/a/b").unwrap());
        assert!(exists(&r, "/a/b/c").unwrap());
        assert!(traverse(&r, "/a").unwrap().is_directory());
    }

    #[test]
    fn traverse_through_file_fails_not_a_directory() {
        let mut r = root();
        insert_along(&mut r, "/a", Inode::new_file(REGF | 0o644, 0, 0)).unwrap();
        let err = traverse(&r, "/a/b").unwrap_err();
        assert!(matches!(err, CoreError::NotADirectory));
    }

    #[test]
    fn exists_false_for_missing_terminal_only() {
        let r = root();
        assert!(!exists(&r, "/missing").unwrap());
    }

    #[test]
    fn remove_deletes_terminal_child() {
        let mut r = root();
        insert_along(&mut r, "/a", Inode::new_file(REGF | 0o644, 0, 0)).unwrap();
        remove(&mut r, "/a").unwrap();
        assert!(!exists(&r, "/a").unwrap());
    }

    #[test]
    fn list_excludes_nothing_but_children() {
        let mut r = root();
        insert_along(&mut r, "/a", Inode::new_file(REGF | 0o644, 0, 0)).unwrap();
        insert_along(&mut r, "/b", Inode::new_dir(0o755, 0, 0)).unwrap();
        let mut names = list(&r, "/").unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
