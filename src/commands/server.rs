//! `dopefs server start|stop|restart|status`: daemonize control for the
//! FUSE mount, modeled on the source's `daemonocle`-driven `sqlitefs.py`
//! commands. `--debug` mounts in the foreground instead, the non-daemonizing
//! analogue of the teacher's own `fusemount` command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daemonize::Daemonize;
use fuser::{Config as MountConfig, MountOption};
use log::info;

use crate::bridge::BridgeFs;
use crate::config::{self, Config};
use crate::store::SledStore;
use crate::volume::Session;

#[derive(Parser, Debug)]
#[command(name = "server")]
pub struct Cli {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    Start {
        name: String,
        #[arg(long)]
        foreground: bool,
    },
    Stop {
        name: String,
    },
    Restart {
        name: String,
    },
    Status {
        name: String,
    },
}

pub fn cmd_server(cli: Cli) -> Result<()> {
    match cli.action {
        Action::Start { name, foreground } => start(&name, foreground),
        Action::Stop { name } => stop(&name),
        Action::Restart { name } => {
            let _ = stop(&name);
            start(&name, false)
        }
        Action::Status { name } => status(&name),
    }
}

fn start(name: &str, foreground: bool) -> Result<()> {
    let dir = Config::store_dir()?;
    let config = Config::load()?;
    let entry = config.get(name).ok_or_else(|| anyhow::anyhow!("no config section for volume '{}'", name))?;
    let mount = entry.mount.clone();
    let volume_name = entry.volume_name.clone();
    let debug = entry.debug || foreground;

    if config::is_mounted(&mount) {
        bail!("{} is already mounted", mount.display());
    }

    let password = rpassword::prompt_password("Password: ").context("reading password")?;
    let store = Box::new(SledStore::open(&dir, name)?);
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };
    let session = Session::open(store, &volume_name, password.as_bytes(), uid, gid, 0)?;
    crate::logging::init(debug);

    let mut mount_config = MountConfig::default();
    mount_config.mount_options =
        vec![MountOption::FSName(name.to_string()), MountOption::CUSTOM("subtype=dopefs".to_string())];

    if !foreground {
        let pidfile = Config::pidfile(name)?;
        Daemonize::new().pid_file(&pidfile).start().context("daemonizing")?;
    }

    info!("mounting volume '{}' at {}", name, mount.display());
    let bridge = BridgeFs::new(session);
    fuser::mount(bridge, &mount, &mount_config).context("fuse mount failed")?;
    Ok(())
}

fn stop(name: &str) -> Result<()> {
    let config = Config::load()?;
    let entry = config.get(name).ok_or_else(|| anyhow::anyhow!("no config section for volume '{}'", name))?;
    let mount = entry.mount.clone();

    if !config::is_mounted(&mount) {
        bail!("{} is not mounted", mount.display());
    }

    unmount(&mount)?;

    let pidfile = Config::pidfile(name)?;
    let _ = std::fs::remove_file(&pidfile);
    info!("unmounted volume '{}'", name);
    Ok(())
}

fn unmount(mount: &Path) -> Result<()> {
    let status = std::process::Command::new("fusermount").arg("-u").arg(mount).status();
    match status {
        Ok(s) if s.success() => Ok(()),
        _ => {
            let status = std::process::Command::new("umount").arg(mount).status()
                .context("spawning umount")?;
            if status.success() {
                Ok(())
            } else {
                bail!("failed to unmount {}", mount.display())
            }
        }
    }
}

fn status(name: &str) -> Result<()> {
    let config = Config::load()?;
    let entry = config.get(name).ok_or_else(|| anyhow::anyhow!("no config section for volume '{}'", name))?;
    if config::is_mounted(&entry.mount) {
        println!("{name}: mounted at {}", entry.mount.display());
    } else {
        println!("{name}: not mounted");
    }
    Ok(())
}
