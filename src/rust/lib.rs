// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

mod collections;

pub mod runtime;
pub mod tasks;

pub use crate::runtime::{
    fail::Fail,
    fd::FileDesc,
    poller::Poller,
    scheduler::{
        EventLoop,
        SharedTask,
        Target,
        Task,
        TaskId,
        TaskOutcome,
        TaskState,
    },
};

#[cfg(target_os = "linux")]
pub use crate::runtime::poller::EpollPoller;

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling function otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure_eq!({}, {}) failed, left: {:?}, right: {:?}",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}

/// Ensures that two expressions are not equal, bailing out of the calling function otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure_neq!({}, {}) failed, left: {:?}, right: {:?}",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}
