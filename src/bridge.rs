//! The `fuser::Filesystem` adapter (spec.md §4.4), grounded on the
//! teacher's `commands/fusemount.rs`. The session underneath is
//! path-addressed, not inode-addressed, so this module carries the same
//! kind of runtime inode-mapping trick the teacher uses for subvolume
//! inums (`map_root_ino`/`unmap_root_ino`): a bidirectional `INodeNo ⇄
//! path` table, assigning a fresh `u64` on every `lookup`/`create`/`mkdir`
//! miss.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    AccessFlags, FileAttr, FileType, FileHandle, Filesystem, FopenFlags, Generation, INodeNo,
    KernelConfig, OpenFlags, Request, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Errno,
};
use log::debug;

use crate::error::CoreError;
use crate::fs::inode::{Stat, DIRT, REGF};
use crate::volume::Session;

const TTL: Duration = Duration::from_secs(1);
#[cfg(test)]
const ROOT_INO: INodeNo = INodeNo(1);

struct InodeTable {
    ino_to_path: HashMap<u64, String>,
    path_to_ino: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut t = InodeTable { ino_to_path: HashMap::new(), path_to_ino: HashMap::new(), next_ino: 2 };
        t.ino_to_path.insert(1, "/".to_string());
        t.path_to_ino.insert("/".to_string(), 1);
        t
    }

    fn path_of(&self, ino: INodeNo) -> Option<&str> {
        self.ino_to_path.get(&ino.0).map(String::as_str)
    }

    fn ino_of(&mut self, path: &str) -> INodeNo {
        if let Some(&ino) = self.path_to_ino.get(path) {
            return INodeNo(ino);
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.ino_to_path.insert(ino, path.to_string());
        self.path_to_ino.insert(path.to_string(), ino);
        INodeNo(ino)
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.path_to_ino.remove(path) {
            self.ino_to_path.remove(&ino);
        }
    }

    fn rename_path(&mut self, old: &str, new: &str) {
        if let Some(ino) = self.path_to_ino.remove(old) {
            self.path_to_ino.insert(new.to_string(), ino);
            self.ino_to_path.insert(ino, new.to_string());
        }
    }
}

struct Inner {
    session: Session,
    inodes: InodeTable,
}

pub struct BridgeFs {
    inner: Mutex<Inner>,
}

impl BridgeFs {
    pub fn new(session: Session) -> Self {
        BridgeFs { inner: Mutex::new(Inner { session, inodes: InodeTable::new() }) }
    }
}

/// Maps a `CoreError` to the POSIX errno spec.md §4.4 specifies, collapsing
/// every crypto failure to `EIO` per spec.md §7.
fn to_errno(err: &CoreError) -> Errno {
    match err {
        CoreError::NotFound => Errno::ENOENT,
        CoreError::NotADirectory => Errno::ENOTDIR,
        CoreError::PermissionDenied => Errno::EACCES,
        CoreError::NotEmpty => Errno::ENOTEMPTY,
        CoreError::UnexpectedKind => Errno::EISDIR,
        CoreError::QuotaExceeded => Errno::ENOSPC,
        CoreError::Dope(_) => Errno::EIO,
        CoreError::Store(_) | CoreError::Io(_) => Errno::EIO,
        CoreError::MalformedTree(_) | CoreError::Config(_) => Errno::EIO,
    }
}

fn child_path(parent: &str, name: &OsStr) -> String {
    let name = String::from_utf8_lossy(name.as_bytes());
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn stat_to_attr(ino: INodeNo, stat: &Stat) -> FileAttr {
    let kind = if stat.mode & DIRT != 0 { FileType::Directory } else { FileType::RegularFile };
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: secs_to_systime(stat.atime),
        mtime: secs_to_systime(stat.mtime),
        ctime: secs_to_systime(stat.ctime),
        crtime: UNIX_EPOCH,
        kind,
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn secs_since_epoch(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn secs_to_systime(secs: f64) -> SystemTime {
    if secs <= 0.0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs_f64(secs)
    }
}

fn access_mask(flags: AccessFlags) -> u32 {
    let mut mask = 0;
    if flags.contains(AccessFlags::R_OK) {
        mask |= 0o4;
    }
    if flags.contains(AccessFlags::W_OK) {
        mask |= 0o2;
    }
    if flags.contains(AccessFlags::X_OK) {
        mask |= 0o1;
    }
    mask
}

impl Filesystem for BridgeFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::io::Result<()> {
        debug!("dopefs: mount initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("dopefs: unmounting");
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={:?}, name={:?})", parent, name);
        let mut inner = self.inner.lock().unwrap();
        let Some(parent_path) = inner.inodes.path_of(parent).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        match inner.session.getattr(&path) {
            Ok(stat) => {
                let ino = inner.inodes.ino_of(&path);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), Generation(0));
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.getattr(path) {
            Ok(stat) => reply.attr(&TTL, &stat_to_attr(ino, &stat)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let result = (|| -> Result<(), CoreError> {
            if let Some(mode) = mode {
                inner.session.chmod(&path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                inner.session.chown(&path, uid, gid)?;
            }
            if let Some(size) = size {
                inner.session.truncate(&path, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                let current = inner.session.getattr(&path)?;
                let atime_arg = match atime {
                    Some(fuser::TimeOrNow::SpecificTime(t)) => Some(secs_since_epoch(t)),
                    Some(fuser::TimeOrNow::Now) => None,
                    None => Some(current.atime),
                };
                let mtime_arg = match mtime {
                    Some(fuser::TimeOrNow::SpecificTime(t)) => Some(secs_since_epoch(t)),
                    Some(fuser::TimeOrNow::Now) => None,
                    None => Some(current.mtime),
                };
                inner.session.utimens(&path, atime_arg, mtime_arg)?;
            }
            Ok(())
        })();
        match result.and_then(|_| inner.session.getattr(&path)) {
            Ok(stat) => reply.attr(&TTL, &stat_to_attr(ino, &stat)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn mkdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        debug!("mkdir(parent={:?}, name={:?}, mode={:#o})", parent, name, mode);
        let mut inner = self.inner.lock().unwrap();
        let Some(parent_path) = inner.inodes.path_of(parent).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        match inner.session.mkdir(&path, mode).and_then(|_| inner.session.getattr(&path)) {
            Ok(stat) => {
                let ino = inner.inodes.ino_of(&path);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), Generation(0));
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={:?}, name={:?}, mode={:#o})", parent, name, mode);
        let mut inner = self.inner.lock().unwrap();
        let Some(parent_path) = inner.inodes.path_of(parent).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        match inner.session.create(&path, mode | REGF).and_then(|_| inner.session.getattr(&path)) {
            Ok(stat) => {
                let ino = inner.inodes.ino_of(&path);
                reply.created(&TTL, &stat_to_attr(ino, &stat), Generation(0), FileHandle(0), FopenFlags::empty());
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={:?}, name={:?})", parent, name);
        let mut inner = self.inner.lock().unwrap();
        let Some(parent_path) = inner.inodes.path_of(parent).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        match inner.session.unlink(&path) {
            Ok(()) => {
                inner.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={:?}, name={:?})", parent, name);
        let mut inner = self.inner.lock().unwrap();
        let Some(parent_path) = inner.inodes.path_of(parent).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let path = child_path(&parent_path, name);
        match inner.session.rmdir(&path) {
            Ok(()) => {
                inner.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: fuser::RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!("rename(parent={:?}, name={:?}, newparent={:?}, newname={:?})", parent, name, newparent, newname);
        let mut inner = self.inner.lock().unwrap();
        let (Some(parent_path), Some(newparent_path)) =
            (inner.inodes.path_of(parent).map(str::to_string), inner.inodes.path_of(newparent).map(str::to_string))
        else {
            reply.error(Errno::ENOENT);
            return;
        };
        let old = child_path(&parent_path, name);
        let new = child_path(&newparent_path, newname);
        match inner.session.rename(&old, &new) {
            Ok(()) => {
                inner.inodes.rename_path(&old, &new);
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn open(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(FileHandle(0), FopenFlags::empty());
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(FileHandle(0), FopenFlags::empty());
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, _fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        reply.ok();
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyData,
    ) {
        debug!("read(ino={:?}, offset={}, size={})", ino, offset, size);
        let inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.read(path, size as u64, offset) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: fuser::WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={:?}, offset={}, len={})", ino, offset, data.len());
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.write(&path, data, offset) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn flush(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, _lock_owner: fuser::LockOwner, reply: ReplyEmpty) {
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.flush(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn fsync(&self, _req: &Request, _ino: INodeNo, _fh: FileHandle, _datasync: bool, reply: ReplyEmpty) {
        let mut inner = self.inner.lock().unwrap();
        match inner.session.fsync() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn readdir(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, offset: u64, mut reply: ReplyDirectory) {
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let names = match inner.session.readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(to_errno(&e));
                return;
            }
        };
        for (i, name) in names.into_iter().enumerate().skip(offset as usize) {
            let entry_path = match name.as_str() {
                "." => path.clone(),
                ".." => path.clone(),
                child => child_path(&path, OsStr::new(child)),
            };
            let ino = inner.inodes.ino_of(&entry_path);
            let kind = match inner.session.getattr(&entry_path) {
                Ok(stat) if stat.mode & DIRT != 0 => FileType::Directory,
                Ok(_) => FileType::RegularFile,
                Err(_) => FileType::RegularFile,
            };
            if reply.add(ino, (i + 1) as u64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        let inner = self.inner.lock().unwrap();
        let vfs = inner.session.statfs();
        reply.statfs(
            vfs.f_blocks,
            vfs.f_bfree,
            vfs.f_bavail,
            vfs.f_files,
            vfs.f_ffree,
            vfs.f_bsize as u32,
            vfs.f_namemax as u32,
            vfs.f_frsize as u32,
        );
    }

    fn getxattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, size: u32, reply: ReplyXattr) {
        let inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.getxattr(path, &name.to_string_lossy()) {
            Ok(value) if size == 0 => reply.size(value.len() as u32),
            Ok(value) if (value.len() as u32) <= size => reply.data(&value),
            Ok(_) => reply.error(Errno::ERANGE),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn setxattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.setxattr(&path, &name.to_string_lossy(), value) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn listxattr(&self, _req: &Request, ino: INodeNo, size: u32, reply: ReplyXattr) {
        let inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let names = match inner.session.listxattr(path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(to_errno(&e));
                return;
            }
        };
        let mut packed = Vec::new();
        for name in &names {
            packed.extend_from_slice(name.as_bytes());
            packed.push(0);
        }
        if size == 0 {
            reply.size(packed.len() as u32);
        } else if packed.len() as u32 <= size {
            reply.data(&packed);
        } else {
            reply.error(Errno::ERANGE);
        }
    }

    fn removexattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let mut inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino).map(str::to_string) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match inner.session.removexattr(&path, &name.to_string_lossy()) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        let inner = self.inner.lock().unwrap();
        let Some(path) = inner.inodes.path_of(ino) else {
            reply.error(Errno::EFAULT);
            return;
        };
        match inner.session.access(path, access_mask(mask)) {
            Ok(()) => reply.ok(),
            Err(CoreError::NotFound) => reply.error(Errno::EFAULT),
            Err(e) => reply.error(to_errno(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledStore;

    fn bridge(dir: &std::path::Path) -> BridgeFs {
        let store = Box::new(SledStore::open(dir, "testvol").unwrap());
        let session = Session::open(store, "testvol", b"pw", 1000, 1000, 1_000_000).unwrap();
        BridgeFs::new(session)
    }

    #[test]
    fn lookup_assigns_stable_inode_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(dir.path());
        let mut inner = bridge.inner.lock().unwrap();
        let a = inner.inodes.ino_of("/a");
        let b = inner.inodes.ino_of("/a");
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INO);
    }

    #[test]
    fn core_error_maps_to_expected_errno() {
        assert_eq!(to_errno(&CoreError::NotFound), Errno::ENOENT);
        assert_eq!(to_errno(&CoreError::NotADirectory), Errno::ENOTDIR);
        assert_eq!(to_errno(&CoreError::PermissionDenied), Errno::EACCES);
        assert_eq!(to_errno(&CoreError::NotEmpty), Errno::ENOTEMPTY);
        assert_eq!(to_errno(&CoreError::UnexpectedKind), Errno::EISDIR);
    }

    #[test]
    fn child_path_joins_root_without_double_slash() {
        assert_eq!(child_path("/", OsStr::new("a")), "/a");
        assert_eq!(child_path("/a", OsStr::new("b")), "/a/b");
    }
}
