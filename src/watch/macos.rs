// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! kqueue backend.  A vnode filter on the directory fd says
//! *something* changed; a rescan against an mtime-keyed
//! snapshot turns that into per-name deltas.  File identity is
//! not preserved across renames (a rename is a delete plus an
//! add).

use super::{Delta, Event};
use crate::result::{errno, Error, Result};
use core::ffi::CStr;
use core::mem::MaybeUninit;
use std::collections::VecDeque;
use std::os::fd::RawFd;

const MAX_SNAP: usize = 4096;

struct Snap {
    name: Vec<u8>,
    mtime: i64,
}

pub(crate) struct Watch {
    kq: RawFd,
    dirfd: RawFd,
    snap: Vec<Snap>,
    pending: VecDeque<Event>,
}

impl Watch {
    pub fn new() -> Result<Watch> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Error::Watch(errno()));
        }
        Ok(Watch {
            kq,
            dirfd: -1,
            snap: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn watch(&mut self, path: &CStr) {
        if self.dirfd >= 0 {
            unsafe { libc::close(self.dirfd) };
        }
        self.pending.clear();
        self.dirfd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if self.dirfd < 0 {
            self.snap.clear();
            return;
        }
        unsafe {
            let mut kev: libc::kevent = core::mem::zeroed();
            kev.ident = self.dirfd as usize;
            kev.filter = libc::EVFILT_VNODE;
            kev.flags = libc::EV_ADD | libc::EV_CLEAR;
            kev.fflags = libc::NOTE_WRITE
                | libc::NOTE_DELETE
                | libc::NOTE_RENAME
                | libc::NOTE_ATTRIB;
            let zero = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            libc::kevent(
                self.kq,
                &kev,
                1,
                core::ptr::null_mut(),
                0,
                &zero,
            );
        }
        self.snap = snapshot(self.dirfd);
    }

    pub fn fd(&self) -> Option<RawFd> {
        (self.kq >= 0).then_some(self.kq)
    }

    pub fn pump(&mut self) -> Option<Event> {
        if let Some(e) = self.pending.pop_front() {
            return Some(e);
        }
        if self.dirfd < 0 {
            return None;
        }
        unsafe {
            let mut kev = MaybeUninit::<libc::kevent>::uninit();
            let zero = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            let n = libc::kevent(
                self.kq,
                core::ptr::null(),
                0,
                kev.as_mut_ptr(),
                1,
                &zero,
            );
            if n <= 0 {
                return None;
            }
        }
        self.diff();
        self.pending.pop_front()
    }

    /// Rescans the directory and queues one delta per changed
    /// name.
    fn diff(&mut self) {
        let new = snapshot(self.dirfd);
        if new.len() >= MAX_SNAP {
            self.snap = new;
            self.pending.push_back(Event::overflow());
            return;
        }
        for n in &new {
            match self.snap.iter().find(|o| o.name == n.name) {
                None => self
                    .pending
                    .push_back(Event::named(Delta::Add, &n.name)),
                Some(o) if o.mtime != n.mtime => self
                    .pending
                    .push_back(Event::named(Delta::Modify, &n.name)),
                Some(_) => {}
            }
        }
        for o in &self.snap {
            if !new.iter().any(|n| n.name == o.name) {
                self.pending.push_back(Event::named(Delta::Del, &o.name));
            }
        }
        self.snap = new;
    }
}

/// Lists the directory with per-entry mtimes.
fn snapshot(dirfd: RawFd) -> Vec<Snap> {
    let mut out = Vec::new();
    unsafe {
        let fd = libc::openat(
            dirfd,
            c".".as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        );
        if fd < 0 {
            return out;
        }
        let d = libc::fdopendir(fd);
        if d.is_null() {
            libc::close(fd);
            return out;
        }
        loop {
            let e = libc::readdir(d);
            if e.is_null() {
                break;
            }
            let name = CStr::from_ptr((*e).d_name.as_ptr());
            let nb = name.to_bytes();
            if nb == b"." || nb == b".." {
                continue;
            }
            let mut st = MaybeUninit::<libc::stat>::uninit();
            let mtime = if libc::fstatat(
                dirfd,
                name.as_ptr(),
                st.as_mut_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            ) == 0
            {
                st.assume_init().st_mtime as i64
            } else {
                0
            };
            out.push(Snap { name: nb.to_vec(), mtime });
            if out.len() >= MAX_SNAP {
                break;
            }
        }
        libc::closedir(d);
    }
    out
}

impl Drop for Watch {
    fn drop(&mut self) {
        unsafe {
            if self.dirfd >= 0 {
                libc::close(self.dirfd);
            }
            if self.kq >= 0 {
                libc::close(self.kq);
            }
        }
    }
}
