//! Inode records (spec.md §3, redesign note §9): a tagged-variant enum
//! stands in for the source's dict keyed by magic byte tags (`0xFF` head,
//! `0xF7` xattrs, `0x7F` journal, `0x7E` blob id, `0xF8` statvfs). Child
//! names live in a `BTreeMap` on the directory variant rather than mixed
//! into the same map as the reserved tags.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const DIRT: u32 = 0o040000;
pub const REGF: u32 = 0o100000;
pub const RWXU: u32 = 0o700;
pub const RGRP: u32 = 0o040;
pub const WGRP: u32 = 0o020;
pub const ROTH: u32 = 0o004;
pub const WUSR: u32 = 0o200;

/// Default mode for auto-created intermediate directories and the volume
/// root: `coreutils.py::init_fs`'s `DIRT | RWXU | RGRP | WGRP | ROTH`.
pub const DEFAULT_DIR_MODE: u32 = DIRT | RWXU | RGRP | WGRP | ROTH;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub ctime: f64,
    pub atime: f64,
    pub mtime: f64,
}

impl Stat {
    pub fn new(mode: u32, uid: u32, gid: u32, nlink: u32, size: u64) -> Self {
        let t = now();
        Stat { mode, uid, gid, nlink, size, ctime: t, atime: t, mtime: t }
    }

    pub fn touch_atime(&mut self) {
        self.atime = now();
    }

    pub fn touch_mtime(&mut self) {
        self.mtime = now();
    }

    pub fn is_directory(&self) -> bool {
        self.mode & DIRT != 0
    }

    /// Permission nibble check (spec.md §4.2): owner/group/other selection
    /// by uid/gid match, AND against the requested mode bits.
    pub fn permits(&self, uid: u32, gid: u32, requested: u32) -> bool {
        let nibble = if uid == self.uid {
            (self.mode >> 6) & 7
        } else if gid == self.gid {
            (self.mode >> 3) & 7
        } else {
            self.mode & 7
        };
        nibble & requested != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatVfs {
    pub f_flags: u64,
    pub f_bsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_frsize: u64,
    pub f_files: u64,
    pub f_favail: u64,
    pub f_ffree: u64,
    pub f_namemax: u64,
}

impl StatVfs {
    pub fn new(fs_size: u64) -> Self {
        StatVfs {
            f_flags: 4096,
            f_bsize: 512,
            f_blocks: fs_size / 512,
            f_bfree: fs_size / 512,
            f_bavail: fs_size / 512,
            f_frsize: 512,
            f_files: fs_size / 4096,
            f_favail: fs_size / 4096,
            f_ffree: fs_size / 4096,
            f_namemax: 4096,
        }
    }

    /// Release `size` bytes' worth of blocks/files back to the pool
    /// (`unlink`/`truncate`-shrink accounting, spec.md §4.3).
    pub fn release(&mut self, size: u64) {
        let blocks = size / 512;
        let files = size / 4096;
        self.f_bfree += blocks;
        self.f_bavail += blocks;
        self.f_ffree += files;
        self.f_favail += files;
    }

    /// Claim `size` bytes' worth of blocks/files, clipping at zero rather
    /// than underflowing (spec.md §7 "write past quota clips the counters
    /// at zero").
    pub fn claim(&mut self, size: u64) {
        let blocks = size / 512;
        let files = size / 4096;
        self.f_bfree = self.f_bfree.saturating_sub(blocks);
        self.f_bavail = self.f_bavail.saturating_sub(blocks);
        self.f_ffree = self.f_ffree.saturating_sub(files);
        self.f_favail = self.f_favail.saturating_sub(files);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Inode {
    File {
        stat: Stat,
        xattrs: BTreeMap<String, Vec<u8>>,
        /// Offset -> encrypted bundle, uncommitted writes (spec.md §3
        /// `JOURNAL`).
        journal: BTreeMap<u64, Vec<u8>>,
        blob_id: Option<String>,
    },
    Directory {
        stat: Stat,
        xattrs: BTreeMap<String, Vec<u8>>,
        children: BTreeMap<String, Inode>,
        /// Only ever populated on the tree root (spec.md §3 "Volume root").
        statvfs: Option<StatVfs>,
    },
}

impl Inode {
    pub fn new_file(mode: u32, uid: u32, gid: u32) -> Self {
        Inode::File {
            stat: Stat::new(mode, uid, gid, 1, 0),
            xattrs: BTreeMap::new(),
            journal: BTreeMap::new(),
            blob_id: None,
        }
    }

    pub fn new_dir(mode: u32, uid: u32, gid: u32) -> Self {
        Inode::Directory {
            stat: Stat::new(mode | DIRT, uid, gid, 1, 4096),
            xattrs: BTreeMap::new(),
            children: BTreeMap::new(),
            statvfs: None,
        }
    }

    pub fn stat(&self) -> &Stat {
        match self {
            Inode::File { stat, .. } => stat,
            Inode::Directory { stat, .. } => stat,
        }
    }

    pub fn stat_mut(&mut self) -> &mut Stat {
        match self {
            Inode::File { stat, .. } => stat,
            Inode::Directory { stat, .. } => stat,
        }
    }

    pub fn xattrs(&self) -> &BTreeMap<String, Vec<u8>> {
        match self {
            Inode::File { xattrs, .. } => xattrs,
            Inode::Directory { xattrs, .. } => xattrs,
        }
    }

    pub fn xattrs_mut(&mut self) -> &mut BTreeMap<String, Vec<u8>> {
        match self {
            Inode::File { xattrs, .. } => xattrs,
            Inode::Directory { xattrs, .. } => xattrs,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Inode::Directory { .. })
    }

    pub fn journal(&self) -> Option<&BTreeMap<u64, Vec<u8>>> {
        match self {
            Inode::File { journal, .. } => Some(journal),
            Inode::Directory { .. } => None,
        }
    }

    pub fn journal_mut(&mut self) -> Option<&mut BTreeMap<u64, Vec<u8>>> {
        match self {
            Inode::File { journal, .. } => Some(journal),
            Inode::Directory { .. } => None,
        }
    }

    pub fn blob_id(&self) -> Option<&str> {
        match self {
            Inode::File { blob_id, .. } => blob_id.as_deref(),
            Inode::Directory { .. } => None,
        }
    }

    pub fn set_blob_id(&mut self, id: String) {
        if let Inode::File { blob_id, .. } = self {
            *blob_id = Some(id);
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Inode>> {
        match self {
            Inode::Directory { children, .. } => Some(children),
            Inode::File { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Inode>> {
        match self {
            Inode::Directory { children, .. } => Some(children),
            Inode::File { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_nibble_selects_by_uid_then_gid_then_other() {
        let stat = Stat::new(0o640, 100, 200, 1, 0);
        assert!(stat.permits(100, 999, 0o4));
        assert!(!stat.permits(100, 999, 0o1));
        assert!(stat.permits(999, 200, 0o4));
        assert!(!stat.permits(999, 999, 0o4));
    }

    #[test]
    fn statvfs_claim_clips_at_zero() {
        let mut vfs = StatVfs::new(1024);
        vfs.claim(1_000_000);
        assert_eq!(vfs.f_bfree, 0);
        assert_eq!(vfs.f_ffree, 0);
    }

    #[test]
    fn statvfs_claim_then_release_round_trips() {
        let mut vfs = StatVfs::new(1_000_000);
        let before = vfs.f_bfree;
        vfs.claim(8192);
        vfs.release(8192);
        assert_eq!(vfs.f_bfree, before);
    }
}
