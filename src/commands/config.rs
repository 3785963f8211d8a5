//! `dopefs config`: resize an existing volume's quota in place, lifted
//! from the source's `sqlitefs.py config` command (shrinking only succeeds
//! if the unused capacity allows it).

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use crate::config::Config;
use crate::store::SledStore;
use crate::volume::Session;

#[derive(Parser, Debug)]
#[command(name = "config")]
pub struct Cli {
    /// Volume name.
    pub name: String,

    /// New total filesystem size, in megabytes.
    #[arg(long = "quota-mb")]
    pub quota_mb: f64,
}

pub fn cmd_config(cli: Cli) -> Result<()> {
    crate::logging::init(false);
    let dir = Config::store_dir()?;
    let mut config = Config::load()?;
    let Some(entry) = config.get(&cli.name) else {
        bail!("no config section for volume '{}'; run `dopefs init` first", cli.name);
    };
    let volume_name = entry.volume_name.clone();
    let mount = entry.mount.clone();
    let debug = entry.debug;

    let password = rpassword::prompt_password("Password: ").context("reading password")?;
    let new_size = (cli.quota_mb * 1_048_576.0) as u64;

    let store = Box::new(SledStore::open(&dir, &cli.name)?);
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };
    let mut session = Session::open(store, &volume_name, password.as_bytes(), uid, gid, new_size)?;
    session.resize(new_size)?;
    session.destroy()?;

    config.insert(
        &cli.name,
        crate::config::VolumeConfig { volume_name, mount, debug, size: new_size },
    );
    config.save()?;

    info!("resized volume '{}' to {:.1} MiB", cli.name, cli.quota_mb);
    Ok(())
}
