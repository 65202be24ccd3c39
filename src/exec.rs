// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-spawn primitive.  Fork, wire the requested fds
//! onto stdin/stdout/stderr, optionally chdir, and exec; the
//! foreground path waits and classifies the exit status.  The
//! child side is async-signal-safe: nothing between fork and
//! exec allocates.

use crate::result::{errno, Error, Result};
use core::ffi::CStr;
use std::os::fd::RawFd;

/// What became of a foreground child.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Status {
    Ok,
    Background,
}

/// Spawns `argv[0]` with `argv`, the given output target on
/// stdout/stderr, an optional stdin fd, and an optional working
/// directory.  Background children are left for the reaper.
pub(crate) fn run_cmd(
    tty: RawFd,
    stdin: Option<RawFd>,
    dir: Option<&CStr>,
    argv: &[&CStr],
    bg: bool,
) -> Result<Status> {
    let mut av: Vec<*const libc::c_char> =
        argv.iter().map(|a| a.as_ptr()).collect();
    av.push(core::ptr::null());

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Exec(errno()));
    }
    if pid == 0 {
        unsafe {
            if let Some(fd) = stdin {
                if libc::dup2(fd, 0) == -1 {
                    libc::_exit(127);
                }
            }
            if tty >= 0
                && (libc::dup2(tty, 1) == -1 || libc::dup2(tty, 2) == -1)
            {
                libc::_exit(127);
            }
            if let Some(d) = dir {
                if libc::chdir(d.as_ptr()) == -1 {
                    libc::_exit(127);
                }
            }
            libc::execvp(av[0], av.as_ptr());
            libc::_exit(127);
        }
    }
    if bg {
        return Ok(Status::Background);
    }
    let mut st = 0;
    loop {
        let r = unsafe { libc::waitpid(pid, &mut st, 0) };
        if r != -1 {
            break;
        }
        if errno() != libc::EINTR {
            return Err(Error::Exec(errno()));
        }
    }
    if libc::WIFEXITED(st) {
        return match libc::WEXITSTATUS(st) {
            0 => Ok(Status::Ok),
            127 => Err(Error::ExecNotFound),
            _ => Err(Error::ExecNonZero),
        };
    }
    if libc::WIFSIGNALED(st) {
        return Err(Error::ExecSignaled);
    }
    Ok(Status::Ok)
}

/// Loads a byte buffer into the read end of a pipe, for
/// commands that consume stdin.  Refuses buffers larger than
/// the pipe can hold without blocking.
pub(crate) fn fd_from_buf(b: &[u8]) -> Result<RawFd> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(Error::PwdTooLarge);
    }
    if b.len() > libc::PIPE_BUF {
        #[cfg(target_os = "linux")]
        {
            let c = unsafe { libc::fcntl(fds[1], libc::F_GETPIPE_SZ) };
            if c < 0 || b.len() > c as usize {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(Error::PwdTooLarge);
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(Error::PwdTooLarge);
        }
    }
    let w = unsafe { libc::write(fds[1], b.as_ptr().cast(), b.len()) };
    unsafe { libc::close(fds[1]) };
    if w < 0 || w as usize != b.len() {
        unsafe { libc::close(fds[0]) };
        return Err(Error::PwdTooLarge);
    }
    Ok(fds[0])
}
