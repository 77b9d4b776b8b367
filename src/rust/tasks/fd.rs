// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    fd::FileDesc,
    scheduler::{
        Target,
        Task,
        TaskOutcome,
        TaskState,
    },
};
use ::libc::c_int;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Leaf task that reads up to a byte count from a descriptor. The task is blocked on the descriptor until the
/// transfer finishes or the peer signals end of file.
pub struct ReadTask {
    /// Source descriptor. Must be in non-blocking mode.
    fd: FileDesc,
    /// Number of bytes to read.
    wanted: usize,
    /// Bytes accumulated so far.
    data: Vec<u8>,
    /// Whether the peer closed before `wanted` bytes arrived.
    eof: bool,
    state: TaskState,
    failure: Option<Fail>,
}

/// Leaf task that writes a byte buffer to a descriptor.
pub struct WriteTask {
    /// Destination descriptor. Must be in non-blocking mode.
    fd: FileDesc,
    /// Bytes to write.
    data: Vec<u8>,
    /// Number of bytes written so far.
    cursor: usize,
    state: TaskState,
    failure: Option<Fail>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for ReadTask
impl ReadTask {
    pub fn new(fd: FileDesc, wanted: usize) -> Self {
        Self {
            fd,
            wanted,
            data: Vec::<u8>::with_capacity(wanted),
            eof: false,
            state: TaskState::Running,
            failure: None,
        }
    }

    /// Bytes read so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Takes the bytes read so far out of the task.
    pub fn take_data(&mut self) -> Vec<u8> {
        ::std::mem::take(&mut self.data)
    }

    /// Whether the peer closed before the requested byte count arrived.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Associate Functions for WriteTask
impl WriteTask {
    pub fn new(fd: FileDesc, data: Vec<u8>) -> Self {
        Self {
            fd,
            data,
            cursor: 0,
            state: TaskState::Running,
            failure: None,
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.cursor
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Task Trait Implementation for ReadTask
impl Task for ReadTask {
    fn name(&self) -> String {
        "read".to_string()
    }

    fn target(&self) -> Target {
        match self.state {
            TaskState::Running => Target::Descriptor(self.fd.get()),
            _ => Target::Ready,
        }
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn poll(&mut self) -> TaskOutcome {
        if self.state != TaskState::Running {
            debug!("poll(): read task polled after finishing");
            return TaskOutcome::Complete;
        }

        let remaining: usize = self.wanted - self.data.len();
        let mut buf: Vec<u8> = vec![0; remaining];
        let nread: isize = unsafe { libc::read(self.fd.get(), buf.as_mut_ptr() as *mut libc::c_void, remaining) };
        match nread {
            nread if nread > 0 => {
                self.data.extend_from_slice(&buf[..nread as usize]);
                trace!("poll(): read {:?}/{:?} bytes from fd={:?}", self.data.len(), self.wanted, self.fd.get());
                if self.data.len() >= self.wanted {
                    self.state = TaskState::Done;
                    return TaskOutcome::Complete;
                }
                TaskOutcome::Continue
            },
            0 => {
                self.eof = true;
                self.state = TaskState::Done;
                TaskOutcome::Complete
            },
            _ => {
                let errno: c_int = unsafe { *libc::__errno_location() };
                // A wakeup may outrun the data; wait for the next one.
                if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                    return TaskOutcome::Continue;
                }
                let e: Fail = Fail::new(errno, "read failed");
                self.state = TaskState::Failed;
                self.failure = Some(e.clone());
                TaskOutcome::Failed(e)
            },
        }
    }

    fn failure(&self) -> Option<Fail> {
        self.failure.clone()
    }
}

/// Task Trait Implementation for WriteTask
impl Task for WriteTask {
    fn name(&self) -> String {
        "write".to_string()
    }

    fn target(&self) -> Target {
        match self.state {
            TaskState::Running => Target::Descriptor(self.fd.get()),
            _ => Target::Ready,
        }
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn poll(&mut self) -> TaskOutcome {
        if self.state != TaskState::Running {
            debug!("poll(): write task polled after finishing");
            return TaskOutcome::Complete;
        }

        let remaining: &[u8] = &self.data[self.cursor..];
        let nwritten: isize =
            unsafe { libc::write(self.fd.get(), remaining.as_ptr() as *const libc::c_void, remaining.len()) };
        match nwritten {
            nwritten if nwritten >= 0 => {
                self.cursor += nwritten as usize;
                trace!("poll(): wrote {:?}/{:?} bytes to fd={:?}", self.cursor, self.data.len(), self.fd.get());
                if self.cursor >= self.data.len() {
                    self.state = TaskState::Done;
                    return TaskOutcome::Complete;
                }
                TaskOutcome::Continue
            },
            _ => {
                let errno: c_int = unsafe { *libc::__errno_location() };
                if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                    return TaskOutcome::Continue;
                }
                let e: Fail = Fail::new(errno, "write failed");
                self.state = TaskState::Failed;
                self.failure = Some(e.clone());
                TaskOutcome::Failed(e)
            },
        }
    }

    fn failure(&self) -> Option<Fail> {
        self.failure.clone()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
