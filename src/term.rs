// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal ownership: the tty file descriptor, raw and cooked
//! modes, the window size, child reaping, and the blocking
//! wait for input, resize, or watcher traffic.
//!
//! Signal handlers cannot receive context, so the saved
//! termios and tty fd live in a process-wide singleton the
//! handlers can reach; the `Term` handle is the owning view
//! used by everything else.

use crate::result::{errno, Error, Result};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::os::fd::RawFd;

/// Escape soup that undoes every mode the drawer enables; safe
/// to emit from a signal handler.
const COOKED_SEQ: &[u8] =
    b"\x1b[J\x1b[?2004l\x1b[?7h\x1b[?25h\x1b[?1049l";

struct SignalState {
    loaded: AtomicBool,
    fd: AtomicI32,
    winch: AtomicBool,
    saved: UnsafeCell<MaybeUninit<libc::termios>>,
}

// The termios cell is written once before `loaded` is set and
// only read afterwards.
unsafe impl Sync for SignalState {}

static TERM: SignalState = SignalState {
    loaded: AtomicBool::new(false),
    fd: AtomicI32::new(-1),
    winch: AtomicBool::new(false),
    saved: UnsafeCell::new(MaybeUninit::uninit()),
};

fn restore_on_signal() {
    if !TERM.loaded.load(Ordering::Acquire) {
        return;
    }
    let fd = TERM.fd.load(Ordering::Relaxed);
    unsafe {
        let t = (*TERM.saved.get()).as_ptr();
        libc::tcsetattr(fd, libc::TCSAFLUSH, t);
        libc::write(fd, COOKED_SEQ.as_ptr().cast(), COOKED_SEQ.len());
        libc::write(
            libc::STDOUT_FILENO,
            COOKED_SEQ.as_ptr().cast(),
            COOKED_SEQ.len(),
        );
    }
}

extern "C" fn on_fatal(s: i32) {
    restore_on_signal();
    unsafe { libc::_exit(128 + s) }
}

extern "C" fn on_crash(s: i32) {
    restore_on_signal();
    unsafe {
        let mut sa: libc::sigaction = core::mem::zeroed();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(s, &sa, core::ptr::null_mut());
        libc::kill(libc::getpid(), s);
    }
}

extern "C" fn on_winch(_s: i32) {
    TERM.winch.store(true, Ordering::Relaxed);
}

fn signal_setup() {
    type Handler = extern "C" fn(i32);
    unsafe {
        let mut sa: libc::sigaction = core::mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = libc::SA_RESTART;
        sa.sa_sigaction = on_fatal as Handler as usize;
        for s in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT] {
            libc::sigaction(s, &sa, core::ptr::null_mut());
        }
        sa.sa_sigaction = on_crash as Handler as usize;
        for s in [
            libc::SIGSEGV,
            libc::SIGABRT,
            libc::SIGBUS,
            libc::SIGFPE,
            libc::SIGILL,
        ] {
            libc::sigaction(s, &sa, core::ptr::null_mut());
        }
        sa.sa_sigaction = on_winch as Handler as usize;
        libc::sigaction(libc::SIGWINCH, &sa, core::ptr::null_mut());
    }
}

bitflags::bitflags! {
    /// What the blocking wait observed.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct Wait: u32 {
        const KEY = 1 << 0;
        const WCH = 1 << 1;
        const FS = 1 << 2;
    }
}

pub(crate) struct Term {
    pub(crate) fd: RawFd,
    pub(crate) null: RawFd,
    saved: libc::termios,
    dead: i32,
}

impl Term {
    /// Acquires the tty (stdin when it is one, else /dev/tty),
    /// saves the termios, opens the null sink, and installs the
    /// restoring signal handlers.
    pub fn new() -> Result<Term> {
        let stdin_tty =
            unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        let stdout_tty =
            unsafe { libc::isatty(libc::STDOUT_FILENO) } == 1;
        let fd = if stdin_tty && stdout_tty {
            libc::STDIN_FILENO
        } else if stdin_tty {
            // Picker mode with stdout redirected: draw on the
            // tty directly so the pipe stays clean.
            let fd = unsafe {
                libc::open(
                    c"/dev/tty".as_ptr(),
                    libc::O_RDWR | libc::O_CLOEXEC,
                )
            };
            if fd < 0 {
                return Err(Error::Term(errno()));
            }
            fd
        } else {
            return Err(Error::Term(libc::ENOTTY));
        };
        let null = unsafe {
            libc::open(
                c"/dev/null".as_ptr(),
                libc::O_WRONLY | libc::O_CLOEXEC,
            )
        };
        if null < 0 {
            return Err(Error::Term(errno()));
        }
        let mut saved = MaybeUninit::<libc::termios>::uninit();
        if unsafe { libc::tcgetattr(fd, saved.as_mut_ptr()) } < 0 {
            return Err(Error::Term(errno()));
        }
        let saved = unsafe { saved.assume_init() };
        unsafe {
            (*TERM.saved.get()).write(saved);
        }
        TERM.fd.store(fd, Ordering::Relaxed);
        TERM.loaded.store(true, Ordering::Release);
        signal_setup();
        Ok(Term { fd, null, saved, dead: 0 })
    }

    pub fn set_dead(&mut self, s: i32) {
        self.dead = 128 + s;
    }

    pub fn dead(&self) -> bool {
        self.dead != 0
    }

    pub fn raw(&self) -> Result<()> {
        let mut n = self.saved;
        n.c_iflag &= !(libc::BRKINT
            | libc::ICRNL
            | libc::INPCK
            | libc::ISTRIP
            | libc::IXON);
        n.c_oflag &= !libc::OPOST;
        n.c_cflag |= libc::CS8;
        n.c_lflag &=
            !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        n.c_cc[libc::VMIN] = 1;
        n.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &n) } < 0 {
            return Err(Error::Term(errno()));
        }
        Ok(())
    }

    pub fn cooked(&self) -> Result<()> {
        let r = unsafe {
            libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.saved)
        };
        if r < 0 {
            return Err(Error::Term(errno()));
        }
        Ok(())
    }

    /// Current window size in (rows, cols).
    pub fn size(&self) -> Result<(u16, u16)> {
        let mut ws = MaybeUninit::<libc::winsize>::uninit();
        let r = unsafe {
            libc::ioctl(self.fd, libc::TIOCGWINSZ, ws.as_mut_ptr())
        };
        if r < 0 {
            return Err(Error::Resize(errno()));
        }
        TERM.winch.store(false, Ordering::Relaxed);
        let ws = unsafe { ws.assume_init() };
        Ok((ws.ws_row, ws.ws_col))
    }

    /// Blocks until a key is readable, the window changed, or
    /// the watcher fd has traffic.
    pub fn wait(&self, watch: Option<RawFd>) -> Wait {
        if TERM.winch.swap(false, Ordering::Relaxed) {
            return Wait::WCH;
        }
        unsafe {
            let mut rfds: libc::fd_set = core::mem::zeroed();
            libc::FD_ZERO(&mut rfds);
            libc::FD_SET(self.fd, &mut rfds);
            let mut max = self.fd;
            if let Some(w) = watch {
                libc::FD_SET(w, &mut rfds);
                max = max.max(w);
            }
            let r = libc::select(
                max + 1,
                &mut rfds,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
            if r < 0 {
                return if TERM.winch.swap(false, Ordering::Relaxed) {
                    Wait::WCH
                } else {
                    Wait::empty()
                };
            }
            let mut e = Wait::empty();
            if libc::FD_ISSET(self.fd, &rfds) {
                e |= Wait::KEY;
            }
            if let Some(w) = watch {
                if libc::FD_ISSET(w, &rfds) {
                    e |= Wait::FS;
                }
            }
            e
        }
    }

    /// Collects any finished background children.
    pub fn reap() {
        unsafe {
            let mut st = 0;
            while libc::waitpid(-1, &mut st, libc::WNOHANG) > 0 {}
        }
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        TERM.loaded.store(false, Ordering::Release);
        unsafe {
            if self.fd >= 0 && self.fd != libc::STDIN_FILENO {
                libc::close(self.fd);
            }
            if self.null >= 0 {
                libc::close(self.null);
            }
        }
    }
}
