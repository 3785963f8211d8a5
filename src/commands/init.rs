//! `dopefs init`: create a new volume (spec.md §6, supplemented by the
//! source's `sqlitefs.py init` command).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use crate::config::{Config, VolumeConfig};
use crate::store::SledStore;
use crate::volume::Session;

#[derive(Parser, Debug)]
#[command(name = "init")]
pub struct Cli {
    /// Volume name, also the config section and the sled db filename.
    pub name: String,

    /// Mountpoint this volume will be mounted at by `dopefs server start`.
    #[arg(long)]
    pub mount: PathBuf,

    /// Name recorded inside the volume itself, defaults to `name`.
    #[arg(long = "volume-name")]
    pub volume_name: Option<String>,

    /// Total filesystem size, in megabytes.
    #[arg(long = "quota-mb")]
    pub quota_mb: f64,

    #[arg(long)]
    pub debug: bool,
}

pub fn cmd_init(cli: Cli) -> Result<()> {
    crate::logging::init(cli.debug);
    let dir = Config::store_dir()?;
    let mut config = Config::load()?;
    if config.get(&cli.name).is_some() {
        bail!("volume '{}' already has a config section", cli.name);
    }
    if !cli.mount.exists() {
        bail!("mountpoint {} does not exist", cli.mount.display());
    }

    let password = rpassword::prompt_password("Password: ").context("reading password")?;
    let confirm = rpassword::prompt_password("Confirm password: ").context("reading password")?;
    if password != confirm {
        bail!("passwords do not match");
    }

    let volume_name = cli.volume_name.clone().unwrap_or_else(|| cli.name.clone());
    let fs_size = (cli.quota_mb * 1_048_576.0) as u64;

    let store = Box::new(SledStore::open(&dir, &cli.name)?);
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };
    let session = Session::open(store, &volume_name, password.as_bytes(), uid, gid, fs_size)?;
    session.destroy()?;

    config.insert(
        &cli.name,
        VolumeConfig { volume_name, mount: cli.mount.clone(), debug: cli.debug, size: fs_size },
    );
    config.save()?;

    info!("initialized volume '{}' ({:.1} MiB) at {}", cli.name, cli.quota_mb, cli.mount.display());
    Ok(())
}
