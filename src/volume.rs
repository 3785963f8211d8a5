//! The volume session (spec.md §4.3): binds a DOPE envelope, a blob store
//! handle and the live in-memory tree for the lifetime of a mount.
//!
//! Per design note §9 "per-operation envelope reconstruction", the data
//! path (`read`/`write`/`truncate`) never touches the session's own
//! envelope: every journal/blob segment is encoded and decoded through a
//! freshly re-marshalled envelope so its ratchet state stays local to one
//! call, leaving the long-lived session envelope solely responsible for
//! the tree's own encrypted serialization at open/flush/fsync/destroy.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::dope::config::CipherMode;
use crate::dope::hash::blake2s_hex;
use crate::dope::Envelope;
use crate::error::{CoreError, Result};
use crate::fs::inode::{DIRT, REGF};
use crate::fs::{Inode, Tree};
use crate::store::Store;

const AUTH_KEY: &str = "auth_key";
const BOOTSTRAP_BCH_POLY: u32 = 8219;
const BOOTSTRAP_ECC_T: u32 = 32;
const BOOTSTRAP_BLOCK_SIZE: u32 = 512;
const TRUNCATE_CHUNK: u64 = 4096;

pub struct Session {
    store: Box<dyn Store>,
    envelope: Envelope,
    tree: Tree,
    volume_name: String,
    password: Zeroizing<Vec<u8>>,
    pub uid: u32,
    pub gid: u32,
}

impl Session {
    /// Open protocol (spec.md §4.3): open the store, marshall or bootstrap
    /// `auth_key`, fixate, then load or initialize the tree.
    pub fn open(
        store: Box<dyn Store>,
        volume_name: &str,
        password: &[u8],
        uid: u32,
        gid: u32,
        fs_size: u64,
    ) -> Result<Self> {
        let mut envelope = match store.get(AUTH_KEY)? {
            Some(descriptor) => Envelope::marshall(std::str::from_utf8(&descriptor).map_err(|_| {
                CoreError::MalformedTree("auth_key descriptor is not valid utf8".into())
            })?, password)?,
            None => {
                let env = Envelope::new(password, BOOTSTRAP_BCH_POLY, BOOTSTRAP_ECC_T, CipherMode::Gcm, &[], BOOTSTRAP_BLOCK_SIZE)?;
                store.set(AUTH_KEY, env.serialize()?.as_bytes())?;
                env
            }
        };
        envelope.fixate();

        let tree = match store.get(volume_name)? {
            Some(bundle) => {
                let bytes = envelope.decode(&bundle, 0, 0)?;
                Tree::deserialize(&bytes)?
            }
            None => {
                let tree = Tree::init(uid, gid, fs_size);
                let bundle = envelope.encode(&tree.serialize()?)?;
                store.set(volume_name, &bundle)?;
                tree
            }
        };

        Ok(Session {
            store,
            envelope,
            tree,
            volume_name: volume_name.to_string(),
            password: Zeroizing::new(password.to_vec()),
            uid,
            gid,
        })
    }

    /// Close protocol (`destroy`, spec.md §4.3): reserialize envelope and
    /// tree, commit and release the store. The unique release point; the
    /// bridge must call this on every exit path.
    pub fn destroy(mut self) -> Result<()> {
        self.store.set(AUTH_KEY, self.envelope.serialize()?.as_bytes())?;
        let bundle = self.envelope.encode(&self.tree.serialize()?)?;
        self.store.set(&self.volume_name, &bundle)?;
        self.store.commit()?;
        self.store.close()
    }

    /// A fresh envelope re-marshalled from the current `auth_key`, used for
    /// every data-path encode/decode so the session's own ratchet state is
    /// never consumed by file traffic (spec.md §5).
    fn fresh_envelope(&self) -> Result<Envelope> {
        let descriptor = self
            .store
            .get(AUTH_KEY)?
            .ok_or_else(|| CoreError::MalformedTree("auth_key missing from store".into()))?;
        let descriptor = std::str::from_utf8(&descriptor)
            .map_err(|_| CoreError::MalformedTree("auth_key descriptor is not valid utf8".into()))?;
        Ok(Envelope::marshall(descriptor, &self.password)?)
    }

    fn normalize(path: &str) -> &str {
        path
    }

    pub fn access(&self, path: &str, requested: u32) -> Result<()> {
        let inode = self.tree.traverse(Self::normalize(path))?;
        if inode.stat().permits(self.uid, self.gid, requested) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied)
        }
    }

    pub fn getattr(&self, path: &str) -> Result<crate::fs::inode::Stat> {
        Ok(self.tree.traverse(Self::normalize(path))?.stat().clone())
    }

    pub fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        self.tree
            .traverse(Self::normalize(path))?
            .xattrs()
            .get(name)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    pub fn listxattr(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.tree.traverse(Self::normalize(path))?.xattrs().keys().cloned().collect())
    }

    pub fn setxattr(&mut self, path: &str, name: &str, value: &[u8]) -> Result<()> {
        self.tree
            .traverse_mut(Self::normalize(path))?
            .xattrs_mut()
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    pub fn removexattr(&mut self, path: &str, name: &str) -> Result<()> {
        self.tree
            .traverse_mut(Self::normalize(path))?
            .xattrs_mut()
            .remove(name)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        let directory_bit = inode.stat().mode & DIRT;
        inode.stat_mut().mode = mode | directory_bit;
        inode.stat_mut().touch_mtime();
        Ok(())
    }

    pub fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        if let Some(uid) = uid {
            inode.stat_mut().uid = uid;
        }
        if let Some(gid) = gid {
            inode.stat_mut().gid = gid;
        }
        inode.stat_mut().touch_mtime();
        Ok(())
    }

    pub fn utimens(&mut self, path: &str, atime: Option<f64>, mtime: Option<f64>) -> Result<()> {
        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        let stat = inode.stat_mut();
        match atime {
            Some(t) => stat.atime = t,
            None => stat.touch_atime(),
        }
        match mtime {
            Some(t) => stat.mtime = t,
            None => stat.touch_mtime(),
        }
        Ok(())
    }

    pub fn create(&mut self, path: &str, mode: u32) -> Result<()> {
        let inode = Inode::new_file(mode | REGF, self.uid, self.gid);
        self.tree.insert_along(Self::normalize(path), inode)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        let inode = Inode::new_dir(mode | DIRT, self.uid, self.gid);
        self.tree.insert_along(Self::normalize(path), inode)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(self.tree.list(Self::normalize(path))?);
        Ok(names)
    }

    /// Selects journal/blob segments overlapping `[offset, offset+size)`
    /// (spec.md §9: the source's inclusive `offset <= key <= offset+size`
    /// bound is a defect; the correct test is interval overlap) and
    /// concatenates their decoded bytes in offset order, then truncates to
    /// `size`.
    pub fn read(&self, path: &str, size: u64, offset: u64) -> Result<Vec<u8>> {
        let inode = self.tree.traverse(Self::normalize(path))?;
        let journal = inode.journal().ok_or(CoreError::UnexpectedKind)?;
        let mut out = Vec::new();
        if !journal.is_empty() {
            for (&seg_offset, bundle) in journal.iter() {
                let mut env = self.fresh_envelope()?;
                let plaintext = env.decode(bundle, 0, 0)?;
                if overlaps(seg_offset, plaintext.len() as u64, offset, size) {
                    out.extend_from_slice(&plaintext);
                }
            }
        } else if let Some(blob_id) = inode.blob_id() {
            if let Some(raw) = self.store.get(blob_id)? {
                let map = deserialize_blob_map(&raw)?;
                for (&seg_offset, bundle) in map.iter() {
                    let mut env = self.fresh_envelope()?;
                    let plaintext = env.decode(bundle, 0, 0)?;
                    if overlaps(seg_offset, plaintext.len() as u64, offset, size) {
                        out.extend_from_slice(&plaintext);
                    }
                }
            }
        }
        out.truncate(size as usize);
        Ok(out)
    }

    /// Assigns a stable blob id, journals the encrypted write, grows the
    /// recorded size and debits statvfs counters (spec.md §4.3 `write`).
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<u64> {
        let mut env = self.fresh_envelope()?;
        let bundle = env.encode(data)?;
        let written = data.len() as u64;
        let blob_id = blake2s_hex(Self::normalize(path).as_bytes());
        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        if inode.journal().is_none() {
            return Err(CoreError::UnexpectedKind);
        }
        if inode.blob_id().is_none() {
            inode.set_blob_id(blob_id);
        }
        inode.journal_mut().unwrap().insert(offset, bundle);
        let stat = inode.stat_mut();
        stat.size += written;
        stat.touch_mtime();
        self.tree.statvfs_mut().claim(written);
        Ok(written)
    }

    /// Reconstructs the file's plaintext from the journal, or failing that
    /// the stored blob, cuts it to `length`, and repacks it as fixed-size
    /// chunks back into the journal (spec.md §4.3 `truncate`; the source's
    /// defect of reading an already-known-empty journal slot is not
    /// reproduced here — see spec.md §9).
    pub fn truncate(&mut self, path: &str, length: u64) -> Result<()> {
        let inode = self.tree.traverse(Self::normalize(path))?;
        let old_size = inode.stat().size;
        let mut plain = self.reconstruct(inode)?;
        plain.resize(length as usize, 0);

        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        let journal = inode.journal_mut().ok_or(CoreError::UnexpectedKind)?;
        journal.clear();
        for (i, chunk) in plain.chunks(TRUNCATE_CHUNK as usize).enumerate() {
            let mut env = self.fresh_envelope()?;
            let bundle = env.encode(chunk)?;
            self.tree
                .traverse_mut(Self::normalize(path))?
                .journal_mut()
                .unwrap()
                .insert(i as u64 * TRUNCATE_CHUNK, bundle);
        }
        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        inode.stat_mut().size = length;
        inode.stat_mut().touch_mtime();

        if length < old_size {
            self.tree.statvfs_mut().release(old_size - length);
        } else if length > old_size {
            self.tree.statvfs_mut().claim(length - old_size);
        }
        Ok(())
    }

    fn reconstruct(&self, inode: &Inode) -> Result<Vec<u8>> {
        let journal = inode.journal().ok_or(CoreError::UnexpectedKind)?;
        if !journal.is_empty() {
            self.decode_segments(journal.iter().map(|(&o, b)| (o, b.clone())))
        } else if let Some(blob_id) = inode.blob_id() {
            match self.store.get(blob_id)? {
                Some(raw) => {
                    let map = deserialize_blob_map(&raw)?;
                    self.decode_segments(map.into_iter())
                }
                None => Ok(Vec::new()),
            }
        } else {
            Ok(Vec::new())
        }
    }

    fn decode_segments(&self, segments: impl Iterator<Item = (u64, Vec<u8>)>) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for (offset, bundle) in segments {
            let mut env = self.fresh_envelope()?;
            let plaintext = env.decode(&bundle, 0, 0)?;
            let end = offset as usize + plaintext.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset as usize..end].copy_from_slice(&plaintext);
        }
        Ok(buf)
    }

    /// Transports the blob under the renamed path's id (spec.md §4.3
    /// `rename`, testable property 9). Non-recursive: descendants of a
    /// renamed directory keep their own path-derived blob ids pointing at
    /// now-stale keys, a limitation carried from the source (spec.md §9).
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let mut inode = self.tree.remove(Self::normalize(old))?;
        if let Some(old_blob_id) = inode.blob_id().map(str::to_string) {
            let new_blob_id = blake2s_hex(Self::normalize(new).as_bytes());
            if let Some(bytes) = self.store.get(&old_blob_id)? {
                self.store.set(&new_blob_id, &bytes)?;
                self.store.delete(&old_blob_id)?;
            }
            inode.set_blob_id(new_blob_id);
        }
        self.tree.insert_along(Self::normalize(new), inode)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        if !self.tree.list(Self::normalize(path))?.is_empty() {
            return Err(CoreError::NotEmpty);
        }
        self.tree.remove(Self::normalize(path))?;
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let inode = self.tree.traverse(Self::normalize(path))?;
        let size = inode.stat().size;
        if let Some(blob_id) = inode.blob_id().map(str::to_string) {
            self.store.delete(&blob_id)?;
            self.tree.statvfs_mut().release(size);
        }
        self.tree.remove(Self::normalize(path))?;
        Ok(())
    }

    /// Merges the journal into the committed blob map, drops any entry at
    /// or past the current size, clears the journal and reserializes the
    /// tree (spec.md §4.3 `flush`).
    pub fn flush(&mut self, path: &str) -> Result<()> {
        let inode = self.tree.traverse(Self::normalize(path))?;
        let size = inode.stat().size;
        let blob_id = inode
            .blob_id()
            .map(str::to_string)
            .unwrap_or_else(|| blake2s_hex(Self::normalize(path).as_bytes()));

        let mut map = match self.store.get(&blob_id)? {
            Some(raw) => deserialize_blob_map(&raw)?,
            None => BTreeMap::new(),
        };

        let inode = self.tree.traverse_mut(Self::normalize(path))?;
        if inode.blob_id().is_none() {
            inode.set_blob_id(blob_id.clone());
        }
        let journal = inode.journal_mut().ok_or(CoreError::UnexpectedKind)?;
        for (offset, bundle) in journal.iter() {
            map.insert(*offset, bundle.clone());
        }
        journal.clear();
        map.retain(|&offset, _| offset < size);

        self.store.set(&blob_id, &serialize_blob_map(&map)?)?;
        self.fsync()
    }

    /// Reserializes the tree under `volume_name` and commits the store
    /// (spec.md §4.3 `fsync`).
    pub fn fsync(&mut self) -> Result<()> {
        let bundle = self.envelope.encode(&self.tree.serialize()?)?;
        self.store.set(&self.volume_name, &bundle)?;
        self.store.commit()
    }

    pub fn statfs(&self) -> crate::fs::inode::StatVfs {
        self.tree.statvfs().clone()
    }

    /// Resizes the volume's quota (spec.md §6, supplemental `config`
    /// command). Shrinking is rejected if it would cut below the space
    /// already in use.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        let vfs = self.tree.statvfs();
        let used = vfs.f_blocks.saturating_sub(vfs.f_bfree) * 512;
        if new_size < used {
            return Err(CoreError::QuotaExceeded);
        }
        *self.tree.statvfs_mut() = crate::fs::inode::StatVfs::new(new_size);
        self.tree.statvfs_mut().claim(used);
        Ok(())
    }
}

fn overlaps(seg_offset: u64, seg_len: u64, req_offset: u64, req_size: u64) -> bool {
    let seg_end = seg_offset + seg_len;
    let req_end = req_offset + req_size;
    seg_offset < req_end && req_offset < seg_end
}

fn deserialize_blob_map(raw: &[u8]) -> Result<BTreeMap<u64, Vec<u8>>> {
    bincode::deserialize(raw).map_err(|e| CoreError::MalformedTree(e.to_string()))
}

fn serialize_blob_map(map: &BTreeMap<u64, Vec<u8>>) -> Result<Vec<u8>> {
    bincode::serialize(map).map_err(|e| CoreError::MalformedTree(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledStore;

    fn session(dir: &std::path::Path, name: &str, password: &[u8]) -> Session {
        let store = Box::new(SledStore::open(dir, name).unwrap());
        Session::open(store, name, password, 1000, 1000, 1_000_000).unwrap()
    }

    #[test]
    fn e1_fresh_volume_has_default_dirs_and_statvfs() {
        let dir = tempfile::tempdir().unwrap();
        let sess = session(dir.path(), "testvol", b"pw");
        assert_eq!(sess.statfs().f_blocks, 1_000_000 / 512);
        let mut names = sess.readdir("/").unwrap();
        names.sort();
        assert_eq!(names, vec![".", "..", ".Trash", ".Trash-1000", ".hidden"]);
    }

    #[test]
    fn e2_write_flush_reopen_round_trips_and_rejects_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sess = session(dir.path(), "testvol", b"pw");
            sess.create("/a", REGF | 0o644).unwrap();
            sess.write("/a", b"hello", 0).unwrap();
            sess.flush("/a").unwrap();
            sess.destroy().unwrap();
        }
        {
            let store = Box::new(SledStore::open(dir.path(), "testvol").unwrap());
            let sess = Session::open(store, "testvol", b"pw", 1000, 1000, 1_000_000).unwrap();
            assert_eq!(sess.read("/a", 5, 0).unwrap(), b"hello");
        }

        let store = Box::new(SledStore::open(dir.path(), "testvol").unwrap());
        assert!(Session::open(store, "testvol", b"wrong", 1000, 1000, 1_000_000).is_err());
    }

    #[test]
    fn e3_truncate_shrinks_size_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.create("/b", REGF | 0o644).unwrap();
        let payload = vec![0xAB; 8192];
        sess.write("/b", &payload, 0).unwrap();
        sess.truncate("/b", 100).unwrap();
        assert_eq!(sess.getattr("/b").unwrap().size, 100);
        let read_back = sess.read("/b", 200, 0).unwrap();
        assert_eq!(read_back.len(), 100);
        assert_eq!(read_back, vec![0xAB; 100]);
    }

    #[test]
    fn e4_rmdir_requires_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.mkdir("/d", 0o755).unwrap();
        sess.create("/d/f", REGF | 0o600).unwrap();
        assert!(matches!(sess.rmdir("/d").unwrap_err(), CoreError::NotEmpty));
        sess.unlink("/d/f").unwrap();
        sess.rmdir("/d").unwrap();
    }

    #[test]
    fn rename_transports_blob_and_clears_old_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.create("/old", REGF | 0o644).unwrap();
        sess.write("/old", b"payload", 0).unwrap();
        sess.flush("/old").unwrap();
        let old_blob = blake2s_hex(b"/old");
        let new_blob = blake2s_hex(b"/new");
        assert!(sess.store.contains(&old_blob).unwrap());
        sess.rename("/old", "/new").unwrap();
        assert!(!sess.store.contains(&old_blob).unwrap());
        assert!(sess.store.contains(&new_blob).unwrap());
        assert!(!sess.tree.exists("/old").unwrap());
        assert!(sess.tree.exists("/new").unwrap());
    }

    #[test]
    fn write_then_unlink_restores_statvfs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.create("/f", REGF | 0o644).unwrap();
        let before = sess.statfs().f_bfree;
        sess.write("/f", &vec![0u8; 4096], 0).unwrap();
        assert_eq!(sess.statfs().f_bfree, before - 8);
        sess.unlink("/f").unwrap();
        assert_eq!(sess.statfs().f_bfree, before);
    }

    #[test]
    fn resize_rejects_shrink_below_used_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.create("/h", REGF | 0o644).unwrap();
        sess.write("/h", &vec![0u8; 8192], 0).unwrap();
        assert!(matches!(sess.resize(4096).unwrap_err(), CoreError::QuotaExceeded));
        sess.resize(2_000_000).unwrap();
        assert_eq!(sess.statfs().f_blocks, 2_000_000 / 512);
    }

    #[test]
    fn read_selects_overlapping_segments_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = session(dir.path(), "testvol", b"pw");
        sess.create("/g", REGF | 0o644).unwrap();
        sess.write("/g", b"AAAA", 0).unwrap();
        sess.write("/g", b"BBBB", 100).unwrap();
        let out = sess.read("/g", 4, 0).unwrap();
        assert_eq!(out, b"AAAA");
    }
}
