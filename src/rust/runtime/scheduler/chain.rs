// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::task::{
        task_ptr,
        SharedTask,
        Target,
    },
};
use ::std::{
    collections::HashSet,
    os::fd::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Terminal value of a fully resolved delegation chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Terminal {
    /// The chain needs no I/O to proceed.
    Ready,
    /// The chain is blocked until the descriptor becomes ready.
    Descriptor(RawFd),
}

/// A resolved delegation chain: the terminal value together with the task that produced it. It is the tail, not the
/// root, that must be advanced to make progress.
pub struct Chain {
    pub terminal: Terminal,
    pub tail: SharedTask,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Resolves the delegation chain rooted at `root` by following delegate targets until a terminal is reached.
/// Resolution is iterative and keeps a visited set of task identities, so a malformed chain that revisits a task is
/// reported instead of looping forever. Resolving twice without an intervening poll yields identical results.
pub fn resolve(root: &SharedTask) -> Result<Chain, Fail> {
    let mut visited: HashSet<*const ()> = HashSet::new();
    let mut current: SharedTask = root.clone();
    visited.insert(task_ptr(&current));

    loop {
        let target: Target = current.borrow().target();
        match target {
            Target::Ready => {
                return Ok(Chain {
                    terminal: Terminal::Ready,
                    tail: current,
                })
            },
            Target::Descriptor(fd) => {
                return Ok(Chain {
                    terminal: Terminal::Descriptor(fd),
                    tail: current,
                })
            },
            Target::Delegate(subtask) => {
                if !visited.insert(task_ptr(&subtask)) {
                    let e: Fail = Fail::cycle_detected(&subtask.borrow().name());
                    error!("resolve(): {:?}", e);
                    return Err(e);
                }
                current = subtask;
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
