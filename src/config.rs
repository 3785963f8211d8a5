//! Per-volume configuration (spec.md §6): one INI section per volume name
//! under `~/.dopefs/config.ini`, with keys `VOLUME_NAME`, `MOUNT`, `DEBUG`,
//! `SIZE`. Read with the `ini` crate (sections are dynamically keyed by
//! volume name, so a fixed serde struct doesn't fit); written by hand since
//! `ini` only reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

pub struct VolumeConfig {
    pub volume_name: String,
    pub mount: PathBuf,
    pub debug: bool,
    pub size: u64,
}

pub struct Config {
    path: PathBuf,
    volumes: BTreeMap<String, VolumeConfig>,
}

impl Config {
    pub fn dopefs_dir() -> Result<PathBuf> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| CoreError::Config("HOME is not set".into()))?;
        Ok(PathBuf::from(home).join(".dopefs"))
    }

    pub fn load() -> Result<Self> {
        let dir = Self::dopefs_dir()?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("config.ini");
        let mut volumes = BTreeMap::new();

        if path.exists() {
            let path_str = path.to_str().ok_or_else(|| CoreError::Config("non-utf8 config path".into()))?;
            let raw = ini::ini!(safe path_str)
                .map_err(|e| CoreError::Config(format!("malformed config.ini: {e}")))?;
            for (section, kv) in raw {
                let get = |key: &str| kv.get(key).and_then(|v| v.clone());
                let volume_name = get("volume_name").unwrap_or_else(|| section.clone());
                let mount = get("mount").ok_or_else(|| {
                    CoreError::Config(format!("section [{section}] is missing MOUNT"))
                })?;
                let debug = get("debug").map(|v| v == "true" || v == "1").unwrap_or(false);
                let size = get("size")
                    .ok_or_else(|| CoreError::Config(format!("section [{section}] is missing SIZE")))?
                    .parse::<u64>()
                    .map_err(|_| CoreError::Config(format!("section [{section}] has non-numeric SIZE")))?;
                volumes.insert(
                    section,
                    VolumeConfig { volume_name, mount: PathBuf::from(mount), debug, size },
                );
            }
        }

        Ok(Config { path, volumes })
    }

    pub fn get(&self, name: &str) -> Option<&VolumeConfig> {
        self.volumes.get(name)
    }

    pub fn insert(&mut self, name: &str, volume: VolumeConfig) {
        self.volumes.insert(name.to_string(), volume);
    }

    pub fn save(&self) -> Result<()> {
        let mut out = String::new();
        for (section, v) in &self.volumes {
            out.push_str(&format!("[{section}]\n"));
            out.push_str(&format!("VOLUME_NAME = {}\n", v.volume_name));
            out.push_str(&format!("MOUNT = {}\n", v.mount.display()));
            out.push_str(&format!("DEBUG = {}\n", v.debug));
            out.push_str(&format!("SIZE = {}\n", v.size));
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }

    pub fn store_dir() -> Result<PathBuf> {
        Self::dopefs_dir()
    }

    pub fn pidfile(name: &str) -> Result<PathBuf> {
        Ok(Self::dopefs_dir()?.join(format!("{name}.pid")))
    }
}

pub fn is_mounted(mount: &Path) -> bool {
    mount.exists()
        && std::fs::read_to_string("/proc/mounts")
            .map(|mounts| mounts.lines().any(|l| l.split_whitespace().nth(1) == mount.to_str()))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips_a_section() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());
        let mut cfg = Config::load().unwrap();
        cfg.insert(
            "vault",
            VolumeConfig {
                volume_name: "vault".into(),
                mount: PathBuf::from("/mnt/vault"),
                debug: true,
                size: 1_048_576,
            },
        );
        cfg.save().unwrap();

        let reloaded = Config::load().unwrap();
        let v = reloaded.get("vault").unwrap();
        assert_eq!(v.mount, PathBuf::from("/mnt/vault"));
        assert!(v.debug);
        assert_eq!(v.size, 1_048_576);
    }
}
