// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A trivial read-only filesystem.
//!
//! The dummy filesystem ignores its disk entirely and serves a
//! fixed set of files. It exists to exercise the VFS before any
//! real filesystem driver is loaded, and as the mount of last
//! resort for a system with no usable disks.

use crate::filesystem::{FileOps, FileSystem, FileSystemType, Whence};
use crate::io::disk::LogicalDisk;
use crate::status::{Error, Result};
use alloc::boxed::Box;
use alloc::sync::Arc;

/// The contents of the filesystem's one file, `motd`.
///
pub static MOTD: &[u8] = b"nothing mounted yet; this is dummyfs\n";

/// The dummy filesystem type, registered as `dummyfs`.
///
pub struct DummyFsType;

impl FileSystemType for DummyFsType {
    fn mount(&self, _disk: Arc<LogicalDisk>) -> Result<Arc<dyn FileSystem>> {
        Ok(Arc::new(DummyFs))
    }
}

struct DummyFs;

impl FileSystem for DummyFs {
    fn open(&self, path: &str, _flags: u32) -> Result<Box<dyn FileOps>> {
        match path {
            "motd" => Ok(Box::new(DummyFile { offset: 0 })),
            _ => Err(Error::NoEnt),
        }
    }
}

struct DummyFile {
    offset: usize,
}

impl FileOps for DummyFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &MOTD[self.offset.min(MOTD.len())..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.offset += count;

        Ok(count)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::NotSup)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Current => self.offset as i64,
            Whence::End => MOTD.len() as i64,
        };
        let target = base.checked_add(offset).ok_or(Error::Inval)?;
        if target < 0 {
            return Err(Error::Inval);
        }
        self.offset = target as usize;

        Ok(self.offset as u64)
    }
}

/// Registers the dummy filesystem type with the kernel's VFS.
///
pub fn register() {
    crate::filesystem::register_fstype("dummyfs", Arc::new(DummyFsType));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_seeks() {
        let fs = DummyFs;
        let mut file = fs.open("motd", 0).unwrap();

        // Read in two chunks.
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, &MOTD[..8]);
        let mut rest = [0u8; 64];
        let n = file.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], &MOTD[8..]);
        assert_eq!(file.read(&mut rest).unwrap(), 0);

        // Seek relative to each reference point.
        assert_eq!(file.seek(2, Whence::Set).unwrap(), 2);
        assert_eq!(file.seek(3, Whence::Current).unwrap(), 5);
        assert_eq!(file.seek(-1, Whence::End).unwrap(), MOTD.len() as u64 - 1);
        assert_eq!(file.seek(-100, Whence::Current), Err(Error::Inval));

        // Writing is not supported.
        assert_eq!(file.write(b"x"), Err(Error::NotSup));
    }

    #[test]
    fn unknown_files_do_not_exist() {
        let fs = DummyFs;
        assert!(fs.open("nope", 0).is_err());
    }
}
