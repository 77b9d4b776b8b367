// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    fd::FileDesc,
    poller::Poller,
    scheduler::TaskId,
};
use ::libc::{
    c_int,
    epoll_event,
    EPOLLIN,
    EPOLLOUT,
    EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
};
use ::std::{
    collections::HashMap,
    os::fd::RawFd,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Readiness multiplexer backed by epoll. The registration table is the source of truth; the kernel's epoll set is
/// kept consistent with it.
pub struct EpollPoller {
    /// Epoll instance.
    epoll_fd: FileDesc,
    /// Registration table.
    table: HashMap<RawFd, TaskId>,
    /// Maximum number of events harvested per wait.
    batch_size: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for EpollPoller
impl EpollPoller {
    /// Creates an epoll instance with an empty registration table.
    pub fn new(batch_size: usize) -> Result<Self, Fail> {
        // Linux ignores the size argument, it just has to be more than 0.
        let epoll_fd: RawFd = match unsafe { libc::epoll_create(10) } {
            fd if fd >= 0 => fd,
            _ => {
                let errno: c_int = unsafe { *libc::__errno_location() };
                return Err(Fail::new(errno, "failed to create epoll instance"));
            },
        };
        Ok(Self {
            epoll_fd: FileDesc::new(epoll_fd),
            table: HashMap::<RawFd, TaskId>::new(),
            batch_size,
        })
    }

    /// Issues an epoll control operation for `fd`.
    fn ctl(&self, op: c_int, fd: RawFd) -> Result<(), Fail> {
        let mut event: epoll_event = epoll_event {
            events: (EPOLLIN | EPOLLOUT) as u32,
            u64: fd as u64,
        };
        match unsafe { libc::epoll_ctl(self.epoll_fd.get(), op, fd, &mut event) } {
            0 => Ok(()),
            _ => {
                let errno: c_int = unsafe { *libc::__errno_location() };
                Err(Fail::new(errno, "epoll control operation failed"))
            },
        }
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Poller Trait Implementation for EpollPoller
impl Poller for EpollPoller {
    fn add(&mut self, fd: RawFd, id: TaskId) -> Result<(), Fail> {
        if self.table.contains_key(&fd) {
            let e: Fail = Fail::duplicate_registration(fd);
            error!("add(): {:?}", e);
            return Err(e);
        }
        self.ctl(EPOLL_CTL_ADD, fd)?;
        self.table.insert(fd, id);
        trace!("add(): fd={:?}, id={:?}", fd, id);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<(), Fail> {
        if self.table.remove(&fd).is_none() {
            let e: Fail = Fail::not_registered(fd);
            error!("remove(): {:?}", e);
            return Err(e);
        }
        // The kernel drops closed descriptors from the epoll set on its own, so a failure here only means the
        // descriptor is already gone.
        if let Err(e) = self.ctl(EPOLL_CTL_DEL, fd) {
            warn!("remove(): fd={:?} already dropped by the kernel ({:?})", fd, e);
        }
        trace!("remove(): fd={:?}", fd);
        Ok(())
    }

    fn update(&mut self, old_fd: RawFd, new_fd: RawFd) -> Result<(), Fail> {
        let id: TaskId = match self.table.get(&old_fd) {
            Some(id) => *id,
            None => {
                let e: Fail = Fail::not_registered(old_fd);
                error!("update(): {:?}", e);
                return Err(e);
            },
        };
        if old_fd == new_fd {
            return Ok(());
        }
        if self.table.contains_key(&new_fd) {
            let e: Fail = Fail::duplicate_registration(new_fd);
            error!("update(): {:?}", e);
            return Err(e);
        }
        self.ctl(EPOLL_CTL_ADD, new_fd)?;
        if let Err(e) = self.ctl(EPOLL_CTL_DEL, old_fd) {
            warn!("update(): fd={:?} already dropped by the kernel ({:?})", old_fd, e);
        }
        self.table.remove(&old_fd);
        self.table.insert(new_fd, id);
        trace!("update(): old_fd={:?}, new_fd={:?}, id={:?}", old_fd, new_fd, id);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, TaskId)>, Fail> {
        // Waiting on an empty epoll set would block forever.
        if self.table.is_empty() {
            debug!("poll(): no registered descriptors");
            return Ok(vec![]);
        }

        let timeout_ms: c_int = match timeout {
            None => -1,
            Some(duration) => duration.as_millis().try_into().unwrap_or(c_int::MAX),
        };

        let mut events: Vec<epoll_event> = vec![epoll_event { events: 0, u64: 0 }; self.batch_size];
        let nevents: usize = loop {
            match unsafe {
                libc::epoll_wait(
                    self.epoll_fd.get(),
                    events.as_mut_ptr(),
                    self.batch_size as c_int,
                    timeout_ms,
                )
            } {
                nevents if nevents >= 0 => break nevents as usize,
                _ => {
                    let errno: c_int = unsafe { *libc::__errno_location() };
                    if errno == libc::EINTR {
                        continue;
                    }
                    return Err(Fail::new(errno, "epoll wait failed"));
                },
            }
        };

        let mut ready: Vec<(RawFd, TaskId)> = Vec::with_capacity(nevents);
        for event in &events[..nevents] {
            let fd: RawFd = event.u64 as RawFd;
            match self.table.get(&fd) {
                Some(id) => ready.push((fd, *id)),
                None => warn!("poll(): dropping event for unregistered descriptor {:?}", fd),
            }
        }
        trace!("poll(): {:?} descriptors ready", ready.len());
        Ok(ready)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::EpollPoller;
    use crate::runtime::{
        fd::pipe,
        poller::Poller,
        scheduler::TaskId,
    };
    use ::anyhow::Result;
    use ::std::{
        os::fd::RawFd,
        time::Duration,
    };

    #[test]
    fn epoll_rejects_duplicate_registration() -> Result<()> {
        let (_reader, writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        crate::ensure_eq!(poller.add(writer.get(), TaskId(1)).is_ok(), true);
        match poller.add(writer.get(), TaskId(2)) {
            Err(e) => crate::ensure_eq!(e.errno, libc::EEXIST),
            Ok(()) => anyhow::bail!("duplicate registration was not rejected"),
        }
        Ok(())
    }

    #[test]
    fn epoll_remove_is_strict() -> Result<()> {
        let (reader, _writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        crate::ensure_eq!(poller.add(reader.get(), TaskId(1)).is_ok(), true);
        crate::ensure_eq!(poller.remove(reader.get()).is_ok(), true);
        match poller.remove(reader.get()) {
            Err(e) => crate::ensure_eq!(e.errno, libc::ENOENT),
            Ok(()) => anyhow::bail!("removing an absent registration did not fail"),
        }
        Ok(())
    }

    #[test]
    fn epoll_reports_writable_descriptor() -> Result<()> {
        let (_reader, writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        // An empty pipe is always writable.
        crate::ensure_eq!(poller.add(writer.get(), TaskId(7)).is_ok(), true);
        let ready: Vec<(RawFd, TaskId)> = match poller.poll(Some(Duration::ZERO)) {
            Ok(ready) => ready,
            Err(e) => anyhow::bail!("failed to poll: {:?}", e),
        };
        crate::ensure_eq!(ready, vec![(writer.get(), TaskId(7))]);
        Ok(())
    }

    #[test]
    fn epoll_update_moves_registration() -> Result<()> {
        let (reader, writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        crate::ensure_eq!(poller.add(writer.get(), TaskId(3)).is_ok(), true);
        crate::ensure_eq!(poller.update(writer.get(), reader.get()).is_ok(), true);

        // The read end of an empty pipe is not ready, so the wait comes back empty.
        let ready: Vec<(RawFd, TaskId)> = match poller.poll(Some(Duration::ZERO)) {
            Ok(ready) => ready,
            Err(e) => anyhow::bail!("failed to poll: {:?}", e),
        };
        crate::ensure_eq!(ready.is_empty(), true);

        // Filling the pipe makes the moved registration fire with the preserved task.
        let payload: &[u8] = b"x";
        let nwritten: isize =
            unsafe { libc::write(writer.get(), payload.as_ptr() as *const libc::c_void, payload.len()) };
        crate::ensure_eq!(nwritten, 1);
        let ready: Vec<(RawFd, TaskId)> = match poller.poll(Some(Duration::ZERO)) {
            Ok(ready) => ready,
            Err(e) => anyhow::bail!("failed to poll: {:?}", e),
        };
        crate::ensure_eq!(ready, vec![(reader.get(), TaskId(3))]);
        Ok(())
    }

    #[test]
    fn epoll_update_onto_self_is_noop() -> Result<()> {
        let (_reader, writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        crate::ensure_eq!(poller.add(writer.get(), TaskId(4)).is_ok(), true);
        crate::ensure_eq!(poller.update(writer.get(), writer.get()).is_ok(), true);
        crate::ensure_eq!(poller.len(), 1);
        Ok(())
    }

    #[test]
    fn epoll_update_rejects_missing_source() -> Result<()> {
        let (reader, writer) = match pipe() {
            Ok(ends) => ends,
            Err(e) => anyhow::bail!("failed to create pipe: {:?}", e),
        };
        let mut poller: EpollPoller = match EpollPoller::new(16) {
            Ok(poller) => poller,
            Err(e) => anyhow::bail!("failed to create poller: {:?}", e),
        };

        match poller.update(writer.get(), reader.get()) {
            Err(e) => crate::ensure_eq!(e.errno, libc::ENOENT),
            Ok(()) => anyhow::bail!("moving an absent registration did not fail"),
        }
        Ok(())
    }
}
