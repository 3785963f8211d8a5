//! The `Tree` aggregate (spec.md §3/§4.2): the in-memory directory tree
//! plus root initialization. Collapses the source's double-root artifact
//! (`init_fs`'s outer dict duplicating `HEAD` and keying the real root
//! under an empty-string child `''`, an accident of recursion on re-joined
//! path strings) into a single root `Inode`.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fs::inode::{Inode, StatVfs, DEFAULT_DIR_MODE};
use crate::fs::path;

/// Directories `init_fs` pre-populates on a fresh volume (spec.md §3,
/// exercised by scenario E1).
const DEFAULT_DIRS: &[&str] = &[".Trash", ".Trash-1000", ".hidden"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    root: Inode,
}

impl Tree {
    /// Fresh volume root, owner = caller, pre-allocated statvfs counts from
    /// `fs_size` (spec.md §3 Lifecycle).
    pub fn init(uid: u32, gid: u32, fs_size: u64) -> Self {
        let mut root = Inode::new_dir(DEFAULT_DIR_MODE, uid, gid);
        if let Inode::Directory { statvfs, children, .. } = &mut root {
            *statvfs = Some(StatVfs::new(fs_size));
            for name in DEFAULT_DIRS {
                children.insert((*name).to_string(), Inode::new_dir(DEFAULT_DIR_MODE, uid, gid));
            }
        }
        Tree { root }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CoreError::MalformedTree(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CoreError::MalformedTree(e.to_string()))
    }

    pub fn root(&self) -> &Inode {
        &self.root
    }

    pub fn statvfs(&self) -> &StatVfs {
        match &self.root {
            Inode::Directory { statvfs: Some(v), .. } => v,
            _ => unreachable!("tree root always carries statvfs"),
        }
    }

    pub fn statvfs_mut(&mut self) -> &mut StatVfs {
        match &mut self.root {
            Inode::Directory { statvfs: Some(v), .. } => v,
            _ => unreachable!("tree root always carries statvfs"),
        }
    }

    pub fn traverse(&self, target: &str) -> Result<&Inode> {
        path::traverse(&self.root, target)
    }

    pub fn traverse_mut(&mut self, target: &str) -> Result<&mut Inode> {
        path::traverse_mut(&mut self.root, target)
    }

    pub fn exists(&self, target: &str) -> Result<bool> {
        path::exists(&self.root, target)
    }

    pub fn remove(&mut self, target: &str) -> Result<Inode> {
        path::remove(&mut self.root, target)
    }

    pub fn insert_along(&mut self, target: &str, value: Inode) -> Result<()> {
        path::insert_along(&mut self.root, target, value)
    }

    pub fn list(&self, target: &str) -> Result<Vec<String>> {
        path::list(&self.root, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_populates_default_trash_and_hidden_dirs() {
        let tree = Tree::init(1000, 1000, 1_000_000);
        let mut names = tree.list("/").unwrap();
        names.sort();
        assert_eq!(names, vec![".Trash", ".Trash-1000", ".hidden"]);
    }

    #[test]
    fn statvfs_blocks_match_quota() {
        let tree = Tree::init(0, 0, 1_000_000);
        assert_eq!(tree.statvfs().f_blocks, 1_000_000 / 512);
    }

    #[test]
    fn serialize_round_trips() {
        let tree = Tree::init(1000, 1000, 65536);
        let bytes = tree.serialize().unwrap();
        let back = Tree::deserialize(&bytes).unwrap();
        assert_eq!(back.statvfs().f_blocks, tree.statvfs().f_blocks);
        assert_eq!(back.list("/").unwrap().len(), 3);
    }
}
