// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! inotify backend.  One non-blocking descriptor, one watch at
//! a time; rewatching replaces the previous directory.

use super::{Delta, Event};
use crate::result::{errno, Error, Result};
use core::ffi::CStr;
use std::os::fd::RawFd;

const BUF: usize = 4096;
const EVSZ: usize = core::mem::size_of::<libc::inotify_event>();

pub(crate) struct Watch {
    fd: RawFd,
    wd: i32,
    buf: [u8; BUF],
    len: usize,
    off: usize,
}

impl Watch {
    pub fn new() -> Result<Watch> {
        let fd = unsafe {
            libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC)
        };
        if fd < 0 {
            return Err(Error::Watch(errno()));
        }
        Ok(Watch { fd, wd: -1, buf: [0; BUF], len: 0, off: 0 })
    }

    /// Points the watch at a directory, dropping the old one.
    pub fn watch(&mut self, path: &CStr) {
        if self.wd != -1 {
            unsafe { libc::inotify_rm_watch(self.fd, self.wd) };
        }
        self.wd = unsafe {
            libc::inotify_add_watch(
                self.fd,
                path.as_ptr(),
                libc::IN_CREATE
                    | libc::IN_DELETE
                    | libc::IN_MOVED_FROM
                    | libc::IN_MOVED_TO
                    | libc::IN_ATTRIB,
            )
        };
        self.len = 0;
        self.off = 0;
    }

    /// The descriptor the main wait may sleep on.
    pub fn fd(&self) -> Option<RawFd> {
        (self.fd >= 0).then_some(self.fd)
    }

    /// Drains one event, refilling the buffer from the kernel
    /// when empty.  Never blocks.
    pub fn pump(&mut self) -> Option<Event> {
        loop {
            if self.off >= self.len {
                let r = unsafe {
                    libc::read(self.fd, self.buf.as_mut_ptr().cast(), BUF)
                };
                if r <= 0 {
                    return None;
                }
                self.len = r as usize;
                self.off = 0;
            }
            if self.len - self.off < EVSZ {
                self.len = 0;
                return None;
            }
            // The kernel writes a packed header followed by a
            // NUL-padded name of `ev.len` bytes.
            let mut hdr = [0u8; EVSZ];
            hdr.copy_from_slice(&self.buf[self.off..self.off + EVSZ]);
            let ev: libc::inotify_event =
                unsafe { core::mem::transmute(hdr) };
            let total = EVSZ + ev.len as usize;
            if self.len - self.off < total {
                self.len = 0;
                return None;
            }
            let nstart = self.off + EVSZ;
            self.off += total;
            if ev.mask & libc::IN_Q_OVERFLOW != 0 {
                return Some(Event::overflow());
            }
            if ev.len == 0 {
                continue;
            }
            let raw = &self.buf[nstart..nstart + ev.len as usize];
            let name = match raw.iter().position(|&b| b == 0) {
                Some(n) => &raw[..n],
                None => raw,
            };
            if name.is_empty() {
                continue;
            }
            let delta = if ev.mask
                & (libc::IN_CREATE | libc::IN_MOVED_TO)
                != 0
            {
                Delta::Add
            } else if ev.mask & (libc::IN_DELETE | libc::IN_MOVED_FROM)
                != 0
            {
                Delta::Del
            } else if ev.mask & libc::IN_ATTRIB != 0 {
                Delta::Modify
            } else {
                continue;
            };
            return Some(Event::named(delta, name));
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        unsafe {
            if self.wd != -1 {
                libc::inotify_rm_watch(self.fd, self.wd);
            }
            if self.fd >= 0 {
                libc::close(self.fd);
            }
        }
    }
}
