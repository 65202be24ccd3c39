// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Various errors.  Variants carrying an `i32` hold the errno
/// observed at the failing call; zero means no errno context.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) enum Error {
    Term(i32),
    Resize(i32),
    Watch(i32),
    Cd(i32),
    Stat(i32),
    Exec(i32),
    ExecNotFound,
    ExecNonZero,
    ExecSignaled,
    EnvUnset,
    ArgvTooLarge,
    MarkOom,
    MarkOomCd,
    NotMarkDir,
    InMarkDir,
    NothingToDo,
    PwdTooLarge,
    NoCallbacks,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term(_) => "terminal",
            Self::Resize(_) => "resize failed",
            Self::Watch(_) => "fs watch",
            Self::Cd(_) => "cd",
            Self::Stat(_) => "stat",
            Self::Exec(_) => "exec",
            Self::ExecNotFound => "exec: command not found",
            Self::ExecNonZero => "exec: exited non-zero",
            Self::ExecSignaled => "exec: killed by signal",
            Self::EnvUnset => "environment variable unset",
            Self::ArgvTooLarge => "argv too large",
            Self::MarkOom => "Not enough memory to materialize marks",
            Self::MarkOomCd => {
                "Not enough memory to materialize marks, unmark to cd"
            }
            Self::NotMarkDir => "Not in mark directory",
            Self::InMarkDir => "In mark directory",
            Self::NothingToDo => "nothing to operate on",
            Self::PwdTooLarge => "PWD too large",
            Self::NoCallbacks => "no callbacks defined",
        }
    }

    /// The errno recorded with the error, or zero.
    pub fn errno(self) -> i32 {
        match self {
            Self::Term(e)
            | Self::Resize(e)
            | Self::Watch(e)
            | Self::Cd(e)
            | Self::Stat(e)
            | Self::Exec(e) => e,
            _ => 0,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> core::result::Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) type Result<T> = core::result::Result<T, Error>;

/// Returns the errno left by the last failing libc call.
pub(crate) fn errno() -> i32 {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location()
    }
    #[cfg(not(target_os = "linux"))]
    unsafe {
        *libc::__error()
    }
}
