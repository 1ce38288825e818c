// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel's error taxonomy.
//!
//! Every fallible operation in the kernel returns a [`Result`] over
//! this one [`Error`] enum, whose variants are derived from POSIX
//! errno values where one fits. A fallible operation either fully
//! succeeds or produces no visible side effect.

use core::fmt;

/// An error returned by a kernel operation.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Operation not permitted.
    Perm,

    /// No such object.
    NoEnt,

    /// I/O failure, including device-protocol errors.
    Io,

    /// Bad file descriptor.
    BadFd,

    /// Allocation or resource exhaustion.
    NoMem,

    /// Bad address.
    Fault,

    /// No such device.
    NoDev,

    /// A path element is not a directory.
    NotDir,

    /// The operation is forbidden on a directory.
    IsDir,

    /// Invalid argument or precondition.
    Inval,

    /// A path component is too long.
    NameTooLong,

    /// The operation is not supported.
    NotSup,

    /// A child command failed.
    SubCmdDied,

    /// End of stream, or a timeout standing in for one.
    Eof,
}

impl Error {
    /// Returns a short human-readable description.
    ///
    pub fn as_str(self) -> &'static str {
        match self {
            Error::Perm => "operation not permitted",
            Error::NoEnt => "no such object",
            Error::Io => "I/O error",
            Error::BadFd => "bad file descriptor",
            Error::NoMem => "out of memory",
            Error::Fault => "bad address",
            Error::NoDev => "no such device",
            Error::NotDir => "not a directory",
            Error::IsDir => "is a directory",
            Error::Inval => "invalid argument",
            Error::NameTooLong => "name too long",
            Error::NotSup => "operation not supported",
            Error::SubCmdDied => "sub-command failed",
            Error::Eof => "end of stream",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The result type used by every fallible kernel operation.
///
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(alloc::format!("{}", Error::NoMem), "out of memory");
        assert_eq!(alloc::format!("{}", Error::Eof), "end of stream");
    }
}
