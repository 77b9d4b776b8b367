// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::TaskId,
};
use ::std::{
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Exports
//======================================================================================================================

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use self::epoll::EpollPoller;
    }
}

//======================================================================================================================
// Trait Definitions
//======================================================================================================================

/// Readiness multiplexer. Wraps an OS-level readiness facility behind a registration table keyed by descriptor. Each
/// registration binds a descriptor to the top-level task whose chain currently depends on it; a descriptor appears at
/// most once in the table.
pub trait Poller {
    /// Registers interest in `fd`, associating it with the given top-level task.
    fn add(&mut self, fd: RawFd, id: TaskId) -> Result<(), Fail>;

    /// Deregisters interest in `fd`. Removing a descriptor that is not registered is an error.
    fn remove(&mut self, fd: RawFd) -> Result<(), Fail>;

    /// Moves a registration from `old_fd` to `new_fd`, preserving the associated task. Moving a registration onto
    /// itself is a no-op.
    fn update(&mut self, old_fd: RawFd, new_fd: RawFd) -> Result<(), Fail>;

    /// Waits until at least one registered descriptor is ready and returns all currently-ready pairs in one pass, in
    /// no particular order. `None` blocks indefinitely; `Some(timeout)` bounds the wait and may return an empty set.
    /// Descriptors that are not registered are never reported.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, TaskId)>, Fail>;
}
