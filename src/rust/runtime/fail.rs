// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libc::{
    c_int,
    EEXIST,
    EIO,
    ELOOP,
    ENOENT,
    ESTALE,
};
use ::std::{
    error,
    fmt,
    io,
    os::fd::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// Constructs a failure indicating that resolving a delegation chain revisited a task.
    pub fn cycle_detected(name: &str) -> Self {
        Self::new(ELOOP, &format!("delegation cycle through task {:?}", name))
    }

    /// Constructs a failure indicating that a descriptor is already registered with the poller.
    pub fn duplicate_registration(fd: RawFd) -> Self {
        Self::new(EEXIST, &format!("descriptor {:?} is already registered", fd))
    }

    /// Constructs a failure indicating that a descriptor is not registered with the poller.
    pub fn not_registered(fd: RawFd) -> Self {
        Self::new(ENOENT, &format!("descriptor {:?} is not registered", fd))
    }

    /// Constructs a failure indicating that a registration no longer matches its chain.
    pub fn stale_registration(fd: RawFd) -> Self {
        Self::new(ESTALE, &format!("registration for descriptor {:?} is stale", fd))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug Trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            errno: e.raw_os_error().unwrap_or(EIO),
            cause: "I/O error".to_string(),
        }
    }
}
