// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded cooperative event loop for delegating tasks.
//!
//! The loop owns the set of scheduled top-level tasks and one [Poller]. Every tick it advances tasks whose delegation
//! chain needs no I/O, wakes chains whose registered descriptor became ready, and keeps the poller's registration
//! table consistent with the live shape of each chain.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::id_map::IdMap,
    runtime::{
        fail::Fail,
        poller::Poller,
        scheduler::{
            chain::{
                resolve,
                Chain,
                Terminal,
            },
            task::{
                task_ptr,
                SharedTask,
                TaskId,
                TaskOutcome,
            },
        },
    },
};
use ::slab::Slab;
use ::std::{
    collections::HashSet,
    os::fd::RawFd,
    time::Duration,
};

#[cfg(target_os = "linux")]
use crate::runtime::{
    config::{
        Config,
        DEFAULT_BATCH_SIZE,
        DEFAULT_BUSY_WAIT,
    },
    poller::EpollPoller,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A scheduled top-level task.
struct Entry {
    /// Chain root.
    root: SharedTask,
    /// Descriptor currently registered with the poller on behalf of this chain, if any.
    registered: Option<RawFd>,
}

/// Single-threaded cooperative event loop.
pub struct EventLoop {
    /// Maps external task ids to entry slots.
    ids: IdMap<TaskId>,
    /// Stores all scheduled top-level tasks.
    entries: Slab<Entry>,
    /// Scheduling order. Insertion order is preserved across ticks.
    order: Vec<TaskId>,
    /// Readiness multiplexer, created and destroyed with the loop.
    poller: Box<dyn Poller>,
    /// Forces bounded poller waits instead of blocking ones.
    busy_wait: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for EventLoop
impl EventLoop {
    /// Creates an event loop with default options, backed by epoll.
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<Self, Fail> {
        Ok(Self::with_poller(
            Box::new(EpollPoller::new(DEFAULT_BATCH_SIZE)?),
            DEFAULT_BUSY_WAIT,
        ))
    }

    /// Creates an event loop from a configuration object, backed by epoll.
    #[cfg(target_os = "linux")]
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        let batch_size: usize = config.batch_size()?;
        let busy_wait: bool = config.busy_wait()?;
        Ok(Self::with_poller(Box::new(EpollPoller::new(batch_size)?), busy_wait))
    }

    /// Creates an event loop on top of the given poller.
    pub fn with_poller(poller: Box<dyn Poller>, busy_wait: bool) -> Self {
        Self {
            ids: IdMap::<TaskId>::default(),
            entries: Slab::<Entry>::new(),
            order: Vec::<TaskId>::new(),
            poller,
            busy_wait,
        }
    }

    /// Schedules a top-level task, returning a handle corresponding to it. The task's chain is resolved once: a chain
    /// blocked on a descriptor is registered with the poller, a ready chain is picked up by the next tick's ready
    /// scan. A chain that cannot be resolved is rejected. Scheduling the same task twice creates two independent
    /// entries.
    pub fn schedule(&mut self, root: SharedTask) -> Result<TaskId, Fail> {
        let chain: Chain = resolve(&root)?;
        let slot: usize = self.entries.insert(Entry {
            root,
            registered: None,
        });
        let id: TaskId = self.ids.insert_with_new_id(slot);
        if let Terminal::Descriptor(fd) = chain.terminal {
            if let Err(e) = self.poller.add(fd, id) {
                self.ids.remove(&id);
                self.entries.remove(slot);
                return Err(e);
            }
            self.entries[slot].registered = Some(fd);
        }
        self.order.push(id);
        trace!(
            "schedule(): name={:?}, id={:?}, terminal={:?}",
            self.entries[slot].root.borrow().name(),
            id,
            chain.terminal
        );
        Ok(id)
    }

    /// Runs one iteration of the loop: the ready scan always precedes the I/O wake, and a task advances at most once
    /// per tick. A task that becomes ready as a side effect of another task's progress within this tick is only
    /// advanced on the next one.
    pub fn tick(&mut self) -> Result<(), Fail> {
        let mut advanced: HashSet<TaskId> = HashSet::<TaskId>::new();

        // Ready scan. The snapshot keeps tasks scheduled mid-tick out of this tick.
        let snapshot: Vec<TaskId> = self.order.clone();
        for id in snapshot {
            let root: SharedTask = match self.lookup(id) {
                Some(root) => root,
                None => continue,
            };
            match resolve(&root) {
                Ok(chain) => {
                    if let Terminal::Ready = chain.terminal {
                        advanced.insert(id);
                        self.advance(id, chain);
                    }
                },
                Err(e) => {
                    warn!("tick(): retiring unresolvable task id={:?}", id);
                    self.retire(id, Some(e));
                },
            }
        }

        // I/O wake. Nothing registered means nothing to wake.
        if self.registered_count() == 0 {
            return Ok(());
        }
        let timeout: Option<Duration> = if self.busy_wait || !advanced.is_empty() || self.has_ready_chain() {
            Some(Duration::ZERO)
        } else {
            None
        };
        let events: Vec<(RawFd, TaskId)> = self.poller.poll(timeout)?;
        for (fd, id) in events {
            if advanced.contains(&id) {
                continue;
            }
            let root: SharedTask = match self.lookup(id) {
                Some(root) => root,
                None => {
                    warn!("tick(): wakeup for retired task id={:?}, descriptor={:?}", id, fd);
                    continue;
                },
            };
            let chain: Chain = match resolve(&root) {
                Ok(chain) => chain,
                Err(e) => {
                    warn!("tick(): retiring unresolvable task id={:?}", id);
                    self.retire(id, Some(e));
                    continue;
                },
            };
            match chain.terminal {
                Terminal::Descriptor(old_fd) if old_fd == fd => {
                    advanced.insert(id);
                    self.advance(id, chain);
                },
                terminal => {
                    // The registration table diverged from chain reality. Re-derive and repair, do not advance.
                    let e: Fail = Fail::stale_registration(fd);
                    warn!("tick(): {:?}, id={:?}, terminal={:?}", e, id, terminal);
                    self.repair(id, fd, terminal);
                },
            }
        }
        Ok(())
    }

    /// Drives the loop to completion: ticks repeatedly while any top-level task remains scheduled.
    pub fn run(&mut self) -> Result<(), Fail> {
        while !self.order.is_empty() {
            self.tick()?;
        }
        Ok(())
    }

    /// Cancels a scheduled task: its current registration (if any) is removed and the task is dropped from the loop
    /// before its next advance. Returns the chain root.
    pub fn cancel(&mut self, id: TaskId) -> Result<SharedTask, Fail> {
        match self.retire(id, None) {
            Some(root) => Ok(root),
            None => Err(Fail::new(libc::ENOENT, &format!("no scheduled task with id {:?}", id))),
        }
    }

    /// Checks whether a task is still scheduled.
    pub fn contains(&self, id: TaskId) -> bool {
        self.ids.get(&id).is_some()
    }

    /// Number of scheduled top-level tasks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Advances the tail of a resolved chain and reconciles the poller afterwards. Completion of the root retires the
    /// entry; completion of an inner tail is observed by its delegating parent on a later tick.
    fn advance(&mut self, id: TaskId, chain: Chain) {
        let root: SharedTask = match self.lookup(id) {
            Some(root) => root,
            None => return,
        };
        let root_is_tail: bool = task_ptr(&chain.tail) == task_ptr(&root);
        let outcome: TaskOutcome = chain.tail.borrow_mut().poll();
        match outcome {
            TaskOutcome::Continue => self.reconcile(id),
            TaskOutcome::Complete if root_is_tail => {
                self.retire(id, None);
            },
            TaskOutcome::Failed(e) if root_is_tail => {
                self.retire(id, Some(e));
            },
            TaskOutcome::Complete | TaskOutcome::Failed(_) => {
                debug!("advance(): inner task {:?} finished, id={:?}", chain.tail.borrow().name(), id);
                self.reconcile(id);
            },
        }
    }

    /// Re-resolves a chain and aligns the poller's registration table with its current shape.
    fn reconcile(&mut self, id: TaskId) {
        let root: SharedTask = match self.lookup(id) {
            Some(root) => root,
            None => return,
        };
        let chain: Chain = match resolve(&root) {
            Ok(chain) => chain,
            Err(e) => {
                warn!("reconcile(): retiring unresolvable task id={:?}", id);
                self.retire(id, Some(e));
                return;
            },
        };
        let slot: usize = match self.ids.get(&id) {
            Some(slot) => slot,
            None => return,
        };
        let registered: Option<RawFd> = match self.entries.get(slot) {
            Some(entry) => entry.registered,
            None => return,
        };
        let result: Result<Option<RawFd>, Fail> = match (registered, chain.terminal) {
            (Some(old_fd), Terminal::Descriptor(new_fd)) if old_fd == new_fd => Ok(registered),
            (Some(old_fd), Terminal::Descriptor(new_fd)) => self.poller.update(old_fd, new_fd).map(|()| Some(new_fd)),
            (Some(old_fd), Terminal::Ready) => self.poller.remove(old_fd).map(|()| None),
            (None, Terminal::Descriptor(new_fd)) => self.poller.add(new_fd, id).map(|()| Some(new_fd)),
            (None, Terminal::Ready) => Ok(None),
        };
        match result {
            Ok(registered) => {
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.registered = registered;
                }
            },
            Err(e) => {
                // The registration table diverged from chain reality.
                warn!("reconcile(): retiring task id={:?}", id);
                self.retire(id, Some(e));
            },
        }
    }

    /// Repairs a stale registration: the table entry for `fd` is re-keyed to the chain's actual terminal.
    fn repair(&mut self, id: TaskId, fd: RawFd, terminal: Terminal) {
        let result: Result<Option<RawFd>, Fail> = match terminal {
            Terminal::Descriptor(new_fd) => self.poller.update(fd, new_fd).map(|()| Some(new_fd)),
            Terminal::Ready => self.poller.remove(fd).map(|()| None),
        };
        match result {
            Ok(registered) => {
                if let Some(entry) = self.ids.get(&id).and_then(|slot| self.entries.get_mut(slot)) {
                    entry.registered = registered;
                }
            },
            Err(e) => {
                warn!("repair(): retiring task id={:?}", id);
                self.retire(id, Some(e));
            },
        }
    }

    /// Removes a task from the loop, deregistering its descriptor first. Failed tasks are reported here; failure
    /// interpretation is left to the task's owner.
    fn retire(&mut self, id: TaskId, failure: Option<Fail>) -> Option<SharedTask> {
        let slot: usize = self.ids.remove(&id)?;
        let entry: Entry = match self.entries.try_remove(slot) {
            Some(entry) => entry,
            None => {
                warn!("retire(): no entry in slot {:?} for task id={:?}", slot, id);
                return None;
            },
        };
        if let Some(fd) = entry.registered {
            if let Err(e) = self.poller.remove(fd) {
                warn!("retire(): failed to deregister descriptor {:?} for task id={:?} ({:?})", fd, id, e);
            }
        }
        self.order.retain(|other| *other != id);
        match failure {
            Some(e) => warn!("retire(): name={:?}, id={:?}, failure={:?}", entry.root.borrow().name(), id, e),
            None => trace!("retire(): name={:?}, id={:?}", entry.root.borrow().name(), id),
        }
        Some(entry.root)
    }

    fn lookup(&self, id: TaskId) -> Option<SharedTask> {
        let slot: usize = self.ids.get(&id)?;
        self.entries.get(slot).map(|entry| entry.root.clone())
    }

    fn registered_count(&self) -> usize {
        self.entries.iter().filter(|(_, entry)| entry.registered.is_some()).count()
    }

    /// Checks whether any live chain currently terminates in ready. The poller must not block while such a chain
    /// exists, otherwise ready tasks would starve behind the wait.
    fn has_ready_chain(&self) -> bool {
        for id in &self.order {
            if let Some(root) = self.lookup(*id) {
                match resolve(&root) {
                    Ok(chain) => {
                        if let Terminal::Ready = chain.terminal {
                            return true;
                        }
                    },
                    // An unresolvable chain needs a tick to get retired.
                    Err(_) => return true,
                }
            }
        }
        false
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
