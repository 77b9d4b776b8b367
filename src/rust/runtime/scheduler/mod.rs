// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod chain;
mod event_loop;
mod task;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    chain::{
        resolve,
        Chain,
        Terminal,
    },
    event_loop::EventLoop,
    task::{
        task_ptr,
        SharedTask,
        Target,
        Task,
        TaskId,
        TaskOutcome,
        TaskState,
    },
};
