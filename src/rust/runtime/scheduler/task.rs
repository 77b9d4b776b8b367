// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    cell::RefCell,
    fmt,
    os::fd::RawFd,
    rc::Rc,
};

//======================================================================================================================
// Types
//======================================================================================================================

/// Shared handle to a task. Tasks are shared between the event loop and any delegating parents, so they live behind
/// reference-counted interior mutability. Task identity is the identity of the allocation.
pub type SharedTask = Rc<RefCell<dyn Task>>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct TaskId(pub u64);

/// What a task is currently waiting on.
#[derive(Clone)]
pub enum Target {
    /// No blocking condition; the task may be advanced on the next tick.
    Ready,
    /// Blocked until the descriptor becomes ready.
    Descriptor(RawFd),
    /// Readiness is wholly determined by the subtask.
    Delegate(SharedTask),
}

/// Coarse execution state of a task, observable by delegating parents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    Running,
    Done,
    Failed,
}

/// Outcome of advancing a task by one step.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    /// The task made progress; its target may have changed shape.
    Continue,
    /// The task finished and should be retired if it is scheduled top-level.
    Complete,
    /// The task failed. Retired like a completion; interpretation is left to the task's owner.
    Failed(Fail),
}

//======================================================================================================================
// Trait Definitions
//======================================================================================================================

/// A unit of suspendable work. Concrete task kinds implement this capability set to participate in the event loop.
pub trait Task {
    /// Returns the name of this task kind, used in diagnostics.
    fn name(&self) -> String;

    /// Reports what this task is currently waiting on. This is a pure observation: calling it any number of times
    /// between polls returns the same value.
    fn target(&self) -> Target;

    /// Reports the coarse execution state of this task.
    fn state(&self) -> TaskState;

    /// Advances the task by one logical step. Only the tail of a chain may be polled, and only when its own target is
    /// ready. Tasks must not block in here; blocking I/O is expressed by returning to a descriptor target.
    fn poll(&mut self) -> TaskOutcome;

    /// Failure cause, if this task failed.
    fn failure(&self) -> Option<Fail> {
        None
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the identity of a shared task.
pub fn task_ptr(task: &SharedTask) -> *const () {
    Rc::as_ptr(task) as *const ()
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Conversion Trait Implementation for TaskId
impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Conversion Trait Implementation for TaskId
impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// Debug Trait Implementation for Target
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Ready => write!(f, "Ready"),
            Target::Descriptor(fd) => write!(f, "Descriptor({:?})", fd),
            Target::Delegate(subtask) => write!(f, "Delegate({:?})", subtask.borrow().name()),
        }
    }
}
