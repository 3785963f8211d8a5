//! Blob store contract (spec.md §6): a namespaced map from string keys to
//! byte blobs. Two reserved keys per volume (`auth_key`, the volume name
//! itself); every other key is a hex BLAKE-2s blob id whose value is a
//! serialized offset -> encrypted-bundle map.

use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait Store: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn contains(&self, key: &str) -> Result<bool>;
    fn commit(&self) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Embedded, on-disk blob store backed by a `sled` database (spec.md §6).
/// One database file per volume, at `<base_dir>/<volume_name>.db`.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(base_dir: &Path, volume_name: &str) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let path: PathBuf = base_dir.join(format!("{volume_name}.db"));
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }
}

impl Store for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    fn commit(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path(), "testvol").unwrap();
        assert!(!store.contains("auth_key").unwrap());
        store.set("auth_key", b"descriptor-bytes").unwrap();
        assert!(store.contains("auth_key").unwrap());
        assert_eq!(store.get("auth_key").unwrap().unwrap(), b"descriptor-bytes");
        store.delete("auth_key").unwrap();
        assert!(store.get("auth_key").unwrap().is_none());
    }

    #[test]
    fn commit_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path(), "testvol").unwrap();
            store.set("volname", b"tree-bytes").unwrap();
            store.commit().unwrap();
        }
        let reopened = SledStore::open(dir.path(), "testvol").unwrap();
        assert_eq!(reopened.get("volname").unwrap().unwrap(), b"tree-bytes");
    }
}
