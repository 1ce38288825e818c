// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The virtual filesystem: filesystem type registration, mounting,
//! and file descriptor dispatch.
//!
//! This module does not implement any particular filesystem. It
//! pairs registered filesystem types with logical disks at mount
//! paths, resolves opens to the mount with the longest matching
//! path prefix, and dispatches descriptor operations through the
//! opened file's operations table.
//!
//! Descriptors live in a single process-wide table for now; moving
//! them into per-process state waits on processes existing.

use crate::io::disk::LogicalDisk;
use crate::status::{Error, Result};
use crate::utils::path::PathReader;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use lazy_static::lazy_static;

pub mod dummyfs;

/// The reference point of a seek.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Whence {
    /// From the start of the file.
    Set,

    /// From the current position.
    Current,

    /// From the end of the file.
    End,
}

/// The operations behind one open file.
///
pub trait FileOps: Send {
    /// Reads from the current position, returning the number of
    /// bytes read; 0 at end of file.
    ///
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes at the current position, returning the number of
    /// bytes written.
    ///
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Moves the current position, returning the new absolute
    /// offset.
    ///
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    /// Releases the file. Optional.
    ///
    fn close(&mut self) {}
}

/// A mounted filesystem instance.
///
pub trait FileSystem: Send + Sync {
    /// Opens the file at `path`, which is relative to the mount
    /// point.
    ///
    fn open(&self, path: &str, flags: u32) -> Result<alloc::boxed::Box<dyn FileOps>>;

    /// Releases the filesystem at unmount. Optional.
    ///
    fn unmount(&self) -> Result<()> {
        Ok(())
    }
}

/// A filesystem implementation that can be mounted on a logical
/// disk.
///
pub trait FileSystemType: Send + Sync {
    /// Mounts the filesystem found on `disk`.
    ///
    fn mount(&self, disk: Arc<LogicalDisk>) -> Result<Arc<dyn FileSystem>>;
}

// One mount: a filesystem instance bound to a path.
//
struct MountPoint {
    // The mount path's components; empty for the root mount.
    components: Vec<String>,
    fs: Arc<dyn FileSystem>,
    open_files: AtomicUsize,
}

struct OpenFile {
    ops: alloc::boxed::Box<dyn FileOps>,
    mount: Arc<MountPoint>,
}

/// The mount table and file descriptor table.
///
pub struct Vfs {
    fstypes: Vec<(&'static str, Arc<dyn FileSystemType>)>,
    mounts: Vec<Arc<MountPoint>>,
    files: BTreeMap<i32, OpenFile>,
    next_fd: i32,
}

impl Vfs {
    /// Returns an empty VFS: no types, no mounts, no open files.
    ///
    pub fn new() -> Vfs {
        Vfs {
            fstypes: Vec::new(),
            mounts: Vec::new(),
            files: BTreeMap::new(),
            next_fd: 0,
        }
    }

    /// Registers a filesystem type under a static name.
    ///
    pub fn register_fstype(&mut self, name: &'static str, fstype: Arc<dyn FileSystemType>) {
        self.fstypes.push((name, fstype));
    }

    /// Mounts a disk at `mountpath` using the named filesystem
    /// type.
    ///
    /// Fails with [`Error::NoEnt`] for an unknown type and
    /// [`Error::Inval`] if the path is already a mount point.
    ///
    pub fn mount(
        &mut self,
        fstype_name: &str,
        disk: Arc<LogicalDisk>,
        mountpath: &str,
    ) -> Result<()> {
        let components = path_components(mountpath)?;
        if self.mounts.iter().any(|mount| mount.components == components) {
            return Err(Error::Inval);
        }
        let fstype = self
            .fstypes
            .iter()
            .find(|(name, _)| *name == fstype_name)
            .map(|(_, fstype)| fstype.clone())
            .ok_or(Error::NoEnt)?;

        let fs = fstype.mount(disk)?;
        self.mounts.push(Arc::new(MountPoint {
            components,
            fs,
            open_files: AtomicUsize::new(0),
        }));

        Ok(())
    }

    /// Unmounts the filesystem at `mountpath`.
    ///
    /// Fails with [`Error::Perm`] while any of its files is still
    /// open.
    ///
    pub fn unmount(&mut self, mountpath: &str) -> Result<()> {
        let components = path_components(mountpath)?;
        let index = self
            .mounts
            .iter()
            .position(|mount| mount.components == components)
            .ok_or(Error::NoEnt)?;
        if self.mounts[index].open_files.load(Ordering::Acquire) > 0 {
            return Err(Error::Perm);
        }

        self.mounts[index].fs.unmount()?;
        self.mounts.remove(index);

        Ok(())
    }

    /// Opens the file at `path`, returning its descriptor.
    ///
    /// The path is resolved against the mount with the longest
    /// matching prefix; the remainder is handed to that
    /// filesystem.
    ///
    pub fn open(&mut self, path: &str, flags: u32) -> Result<i32> {
        let components = path_components(path)?;

        // The deepest mount whose path prefixes ours wins.
        let mount = self
            .mounts
            .iter()
            .filter(|mount| components.starts_with(&mount.components))
            .max_by_key(|mount| mount.components.len())
            .cloned()
            .ok_or(Error::NoEnt)?;

        let remainder = components[mount.components.len()..].join("/");
        let ops = mount.fs.open(&remainder, flags)?;

        let fd = self.next_fd;
        self.next_fd += 1;
        mount.open_files.fetch_add(1, Ordering::AcqRel);
        self.files.insert(fd, OpenFile { ops, mount });

        Ok(fd)
    }

    /// Reads from an open file.
    ///
    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> Result<usize> {
        self.files.get_mut(&fd).ok_or(Error::BadFd)?.ops.read(buf)
    }

    /// Writes to an open file.
    ///
    pub fn write(&mut self, fd: i32, buf: &[u8]) -> Result<usize> {
        self.files.get_mut(&fd).ok_or(Error::BadFd)?.ops.write(buf)
    }

    /// Moves an open file's position.
    ///
    pub fn seek(&mut self, fd: i32, offset: i64, whence: Whence) -> Result<u64> {
        self.files
            .get_mut(&fd)
            .ok_or(Error::BadFd)?
            .ops
            .seek(offset, whence)
    }

    /// Closes an open file, releasing its descriptor.
    ///
    pub fn close(&mut self, fd: i32) -> Result<()> {
        let mut file = self.files.remove(&fd).ok_or(Error::BadFd)?;
        file.ops.close();
        file.mount.open_files.fetch_sub(1, Ordering::AcqRel);

        Ok(())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Vfs::new()
    }
}

fn path_components(path: &str) -> Result<Vec<String>> {
    PathReader::new(path)
        .map(|component| component.map(String::from))
        .collect()
}

lazy_static! {
    /// The kernel's virtual filesystem.
    ///
    static ref VFS: spin::Mutex<Vfs> = spin::Mutex::new(Vfs::new());
}

/// Registers a filesystem type with the kernel's VFS.
///
pub fn register_fstype(name: &'static str, fstype: Arc<dyn FileSystemType>) {
    VFS.lock().register_fstype(name, fstype);
}

/// Mounts a disk in the kernel's VFS. See [`Vfs::mount`].
///
pub fn mount(fstype_name: &str, disk: Arc<LogicalDisk>, mountpath: &str) -> Result<()> {
    VFS.lock().mount(fstype_name, disk, mountpath)
}

/// Unmounts a path in the kernel's VFS. See [`Vfs::unmount`].
///
pub fn unmount(mountpath: &str) -> Result<()> {
    VFS.lock().unmount(mountpath)
}

/// Opens a file in the kernel's VFS. See [`Vfs::open`].
///
pub fn open(path: &str, flags: u32) -> Result<i32> {
    VFS.lock().open(path, flags)
}

/// Reads from an open file in the kernel's VFS.
///
pub fn read(fd: i32, buf: &mut [u8]) -> Result<usize> {
    VFS.lock().read(fd, buf)
}

/// Writes to an open file in the kernel's VFS.
///
pub fn write(fd: i32, buf: &[u8]) -> Result<usize> {
    VFS.lock().write(fd, buf)
}

/// Moves an open file's position in the kernel's VFS.
///
pub fn seek(fd: i32, offset: i64, whence: Whence) -> Result<u64> {
    VFS.lock().seek(fd, offset, whence)
}

/// Closes an open file in the kernel's VFS.
///
pub fn close(fd: i32) -> Result<()> {
    VFS.lock().close(fd)
}

#[cfg(test)]
mod tests {
    use super::dummyfs::DummyFsType;
    use super::*;
    use crate::io::disk::{BlockAddr, DiskOps, LogicalDisk, PhysicalDisk};

    // The dummy filesystem never touches its disk, so a null
    // device suffices.
    struct NullDisk;

    impl DiskOps for NullDisk {
        fn read(&self, buf: &mut [u8], _block_addr: BlockAddr, _block_count: usize) -> Result<()> {
            buf.fill(0);
            Ok(())
        }

        fn write(&self, _buf: &[u8], _block_addr: BlockAddr, _block_count: usize) -> Result<()> {
            Ok(())
        }
    }

    fn null_disk() -> Arc<LogicalDisk> {
        let disk = Arc::new(PhysicalDisk::new(512, alloc::boxed::Box::new(NullDisk)));
        Arc::new(LogicalDisk::new(disk, 0, 16))
    }

    fn vfs_with_dummy() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_fstype("dummyfs", Arc::new(DummyFsType));
        vfs
    }

    #[test]
    fn mount_open_read_close() {
        let mut vfs = vfs_with_dummy();
        vfs.mount("dummyfs", null_disk(), "/").unwrap();

        let fd = vfs.open("/motd", 0).unwrap();
        let mut buf = [0u8; 64];
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], dummyfs::MOTD);

        // At end of file, reads return zero.
        assert_eq!(vfs.read(fd, &mut buf).unwrap(), 0);

        // Seeking rewinds.
        assert_eq!(vfs.seek(fd, 0, Whence::Set).unwrap(), 0);
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], dummyfs::MOTD);

        vfs.close(fd).unwrap();
        assert_eq!(vfs.close(fd), Err(Error::BadFd));
        assert_eq!(vfs.read(fd, &mut buf), Err(Error::BadFd));
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let mut vfs = vfs_with_dummy();
        vfs.mount("dummyfs", null_disk(), "/").unwrap();
        vfs.mount("dummyfs", null_disk(), "/data").unwrap();

        // "/data/motd" resolves inside the "/data" mount, so the
        // filesystem sees the remainder "motd".
        let fd = vfs.open("/data/motd", 0).unwrap();
        vfs.close(fd).unwrap();

        // "/motd" still resolves through the root mount.
        let fd = vfs.open("/motd", 0).unwrap();
        vfs.close(fd).unwrap();

        // A path below "/data" that the inner filesystem lacks is
        // not retried against the root mount.
        assert_eq!(vfs.open("/data/nope", 0), Err(Error::NoEnt));
    }

    #[test]
    fn unmount_refuses_while_busy() {
        let mut vfs = vfs_with_dummy();
        vfs.mount("dummyfs", null_disk(), "/").unwrap();

        let fd = vfs.open("/motd", 0).unwrap();
        assert_eq!(vfs.unmount("/"), Err(Error::Perm));

        vfs.close(fd).unwrap();
        vfs.unmount("/").unwrap();
        assert_eq!(vfs.open("/motd", 0), Err(Error::NoEnt));
    }

    #[test]
    fn mount_errors() {
        let mut vfs = vfs_with_dummy();
        assert_eq!(vfs.mount("nosuchfs", null_disk(), "/"), Err(Error::NoEnt));

        vfs.mount("dummyfs", null_disk(), "/").unwrap();
        assert_eq!(vfs.mount("dummyfs", null_disk(), "/"), Err(Error::Inval));
        assert_eq!(vfs.unmount("/nothing"), Err(Error::NoEnt));
    }
}
