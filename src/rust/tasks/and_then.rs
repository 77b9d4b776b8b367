// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        SharedTask,
        Target,
        Task,
        TaskOutcome,
        TaskState,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Composite task that sequences two pieces of work: it delegates to a first task and, once that one finishes,
/// constructs a continuation task and delegates to it. A failure in either step fails the composite.
pub struct AndThenTask {
    /// Task to run first.
    before: SharedTask,
    /// Continuation, once constructed.
    after: Option<SharedTask>,
    /// Builds the continuation. Consumed when `before` finishes.
    make: Option<Box<dyn FnOnce() -> SharedTask>>,
    state: TaskState,
    failure: Option<Fail>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for AndThenTask
impl AndThenTask {
    pub fn new(before: SharedTask, make: Box<dyn FnOnce() -> SharedTask>) -> Self {
        Self {
            before,
            after: None,
            make: Some(make),
            state: TaskState::Running,
            failure: None,
        }
    }

    /// Marks this composite as failed, borrowing the cause from the finished step when it has one.
    fn fail_from(&mut self, step: &SharedTask) -> TaskOutcome {
        let e: Fail = step
            .borrow()
            .failure()
            .unwrap_or_else(|| Fail::new(libc::EIO, "sequenced task failed"));
        self.state = TaskState::Failed;
        self.failure = Some(e.clone());
        TaskOutcome::Failed(e)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Task Trait Implementation for AndThenTask
impl Task for AndThenTask {
    fn name(&self) -> String {
        "and-then".to_string()
    }

    fn target(&self) -> Target {
        if self.state != TaskState::Running {
            return Target::Ready;
        }
        // Delegate to whichever step is running; once it finishes this composite itself needs a poll.
        match &self.after {
            Some(after) => match after.borrow().state() {
                TaskState::Running => Target::Delegate(after.clone()),
                _ => Target::Ready,
            },
            None => match self.before.borrow().state() {
                TaskState::Running => Target::Delegate(self.before.clone()),
                _ => Target::Ready,
            },
        }
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn poll(&mut self) -> TaskOutcome {
        if self.state != TaskState::Running {
            debug!("poll(): sequenced task polled after finishing");
            return TaskOutcome::Complete;
        }

        let (in_continuation, step): (bool, SharedTask) = match &self.after {
            Some(after) => (true, after.clone()),
            None => (false, self.before.clone()),
        };
        let step_state: TaskState = step.borrow().state();
        match (in_continuation, step_state) {
            (false, TaskState::Done) => match self.make.take() {
                Some(make) => {
                    self.after = Some(make());
                    TaskOutcome::Continue
                },
                None => {
                    let e: Fail = Fail::new(libc::EINVAL, "continuation already consumed");
                    self.state = TaskState::Failed;
                    self.failure = Some(e.clone());
                    TaskOutcome::Failed(e)
                },
            },
            (true, TaskState::Done) => {
                self.state = TaskState::Done;
                TaskOutcome::Complete
            },
            (_, TaskState::Failed) => self.fail_from(&step),
            (_, TaskState::Running) => TaskOutcome::Continue,
        }
    }

    fn failure(&self) -> Option<Fail> {
        self.failure.clone()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
