// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod and_then;
mod fd;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    and_then::AndThenTask,
    fd::{
        ReadTask,
        WriteTask,
    },
};
