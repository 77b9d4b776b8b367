// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::c_int;
use ::std::os::fd::RawFd;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Owning wrapper around a raw OS descriptor. The descriptor is closed when the wrapper is dropped.
pub struct FileDesc {
    fd: RawFd,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for FileDesc
impl FileDesc {
    /// Takes ownership of `fd`.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Returns the underlying raw descriptor without giving up ownership.
    pub fn get(&self) -> RawFd {
        self.fd
    }

    /// Releases ownership of the underlying raw descriptor.
    pub fn leak(mut self) -> RawFd {
        let fd: RawFd = self.fd;
        self.fd = -1;
        fd
    }

    /// Puts the descriptor in non-blocking mode.
    pub fn set_nonblocking(&self) -> Result<(), Fail> {
        let flags: c_int = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags == -1 {
            let errno: c_int = unsafe { *libc::__errno_location() };
            return Err(Fail::new(errno, "failed to get descriptor flags"));
        }
        match unsafe { libc::fcntl(self.fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } {
            0 => Ok(()),
            _ => {
                let errno: c_int = unsafe { *libc::__errno_location() };
                Err(Fail::new(errno, "failed to set NONBLOCK option"))
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Drop Trait Implementation for FileDesc
impl Drop for FileDesc {
    fn drop(&mut self) {
        if self.fd >= 0 && unsafe { libc::close(self.fd) } == -1 {
            let errno: c_int = unsafe { *libc::__errno_location() };
            warn!("failed to close descriptor {:?}: {:?}", self.fd, errno);
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates a pipe. Both ends are returned in non-blocking mode, read end first.
pub fn pipe() -> Result<(FileDesc, FileDesc), Fail> {
    let mut fds: [c_int; 2] = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        let errno: c_int = unsafe { *libc::__errno_location() };
        return Err(Fail::new(errno, "failed to create pipe"));
    }
    let reader: FileDesc = FileDesc::new(fds[0]);
    let writer: FileDesc = FileDesc::new(fds[1]);
    reader.set_nonblocking()?;
    writer.set_nonblocking()?;
    Ok((reader, writer))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
