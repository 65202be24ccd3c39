// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The file manager itself: one `Fm` owns the terminal, the
//! watcher, the directory model, the readline, and the frame
//! buffer, and runs the update → draw → wait → dispatch loop.
//!
//! Actions (no prompt active) and input handlers (prompt
//! active) are the two key dispatch tables at the bottom.

use crate::dir::{Dir, Load, NONE};
use crate::exec;
use crate::filter::Filter;
use crate::key::{self, Key};
use crate::out::Out;
use crate::readline::{Outcome, Readline};
use crate::result::{errno, Error, Result};
use crate::sort;
use crate::term::{Term, Wait};
use crate::vt;
use crate::watch::{Delta, Watch};
use core::ffi::CStr;
use std::ffi::CString;

/// Rows taken from the bottom of the screen by the nav bar and
/// the command line.
pub(crate) const MARGIN: u16 = 2;

const OPENER_DEFAULT: &[u8] = b"xdg-open";
const SHELL_DEFAULT: &[u8] = b"/bin/sh";
const COPYER_DEFAULT: &[u8] = b"xclip";

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct Flags: u32 {
        const ERROR = 1 << 0;
        const ROOT = 1 << 1;

        const REDRAW_DIR = 1 << 2;
        const REDRAW_NAV = 1 << 3;
        const REDRAW_CMD = 1 << 4;
        const REDRAW_FLUSH = 1 << 5;
        const REDRAW = (1 << 2) | (1 << 3) | (1 << 4) | (1 << 5);

        const DIRTY = 1 << 6;
        const DIRTY_WITHIN = 1 << 7;
        const HIDDEN = 1 << 8;
        const TRUNC = 1 << 9;
        const MARK_PWD = 1 << 10;
        const MSG = 1 << 11;
        const MSG_ERR = 1 << 12;
        const PICKER = 1 << 13;
        const PRINT_PWD = 1 << 14;
        const SEARCH = 1 << 15;
    }
}

bitflags::bitflags! {
    /// Per-command configuration, combined from the binding and
    /// the parsed template.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct CmdFlags: u32 {
        const BG = 1 << 0;
        const CONFLICT = 1 << 1;
        const MUT = 1 << 2;
        const EXEC = 1 << 3;
        const MARK_DIR = 1 << 4;
        const NOT_MARK_DIR = 1 << 5;
        const STDIN = 1 << 6;
        const FILE_CURSOR = 1 << 7;
        const EXEC_MARK = 1 << 8;
        const EXEC_ROOT = 1 << 9;
    }
}

/// Callback invoked as the prompt content changes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Press {
    Search,
}

/// Callback invoked when the prompt is submitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Enter {
    Search,
    Cd,
    Run,
}

/// A prompt/command binding.
pub(crate) struct CmdBind {
    pub prompt: &'static [u8],
    pub left: &'static [u8],
    pub right: &'static [u8],
    pub press: Option<Press>,
    pub enter: Option<Enter>,
    pub config: CmdFlags,
}

pub(crate) struct Fm {
    pub(crate) term: Term,
    pub(crate) watch: Watch,
    pub(crate) rl: Readline,
    pub(crate) dir: Dir,
    pub(crate) io: Out,
    pub(crate) key: Key,

    pub(crate) dfd: i32,
    pub(crate) pwd: Vec<u8>,
    pub(crate) ppwd: Vec<u8>,
    pub(crate) mpwd: Vec<u8>,
    pub(crate) vq: Vec<u8>,

    pub(crate) y: usize,
    pub(crate) o: usize,
    pub(crate) c: usize,

    pub(crate) row: u16,
    pub(crate) col: u16,

    pub(crate) f: Flags,
    pub(crate) cf: CmdFlags,
    pub(crate) ds: u8,
    pub(crate) dv: u8,
    pub(crate) sf: Filter,

    pub(crate) opener: Vec<u8>,
    pub(crate) kp: Option<Press>,
    pub(crate) kd: Option<Enter>,
    pub(crate) tz: i64,
}

/// NUL-safe CString from raw path/name bytes.
pub(crate) fn cstring(b: &[u8]) -> CString {
    let n = b.iter().position(|&x| x == 0).unwrap_or(b.len());
    CString::new(&b[..n]).unwrap_or_default()
}

/// Environment lookup with a fallback for unset or empty.
pub(crate) fn get_env(name: &str, def: &[u8]) -> Vec<u8> {
    match std::env::var_os(name) {
        Some(v) if !v.is_empty() => v.into_encoded_bytes(),
        _ => def.to_vec(),
    }
}

/// In-place removal of `.` and `..` components; the input must
/// be absolute and the result keeps a single leading slash.
pub(crate) fn path_resolve(m: &mut Vec<u8>) {
    let l = m.len();
    let s = m.clone();
    let mut i = 0;
    let mut w = 0;
    while i < l {
        while i < l && s[i] == b'/' {
            i += 1;
        }
        if i >= l {
            break;
        }
        let b = i;
        while i < l && s[i] != b'/' {
            i += 1;
        }
        let n = i - b;
        if n == 1 && s[b] == b'.' {
            continue;
        }
        if n == 2 && s[b] == b'.' && s[b + 1] == b'.' {
            if w > 1 {
                if m[w - 1] == b'/' {
                    w -= 1;
                }
                while w > 1 && m[w - 1] != b'/' {
                    w -= 1;
                }
            }
            continue;
        }
        if w == 0 || m[w - 1] != b'/' {
            m[w] = b'/';
            w += 1;
        }
        m[w..w + n].copy_from_slice(&s[b..b + n]);
        w += n;
    }
    if w > 1 && m[w - 1] == b'/' {
        w -= 1;
    }
    if w == 0 {
        m.clear();
        m.push(b'/');
        return;
    }
    m.truncate(w);
}

impl Fm {
    pub fn new() -> Result<Fm> {
        let term = Term::new()?;
        let watch = Watch::new()?;
        let mut fm = Fm {
            term,
            watch,
            rl: Readline::new(80),
            dir: Dir::new(),
            io: Out::new(),
            key: Key { b: [0; 64], l: 0, c: 0 },
            dfd: libc::AT_FDCWD,
            pwd: Vec::new(),
            ppwd: Vec::new(),
            mpwd: Vec::new(),
            vq: Vec::new(),
            y: 0,
            o: 0,
            c: NONE,
            row: 0,
            col: 0,
            f: Flags::empty(),
            cf: CmdFlags::empty(),
            ds: b'n',
            dv: b'n',
            sf: Filter::StartsWith,
            opener: get_env("DFM_OPENER", OPENER_DEFAULT),
            kp: None,
            kd: None,
            tz: crate::date::tz_offset(),
        };
        if unsafe { libc::geteuid() } == 0 {
            fm.f.insert(Flags::ROOT);
        }
        fm.dir.mark_clear_all();
        Ok(fm)
    }

    pub(crate) fn hidden(&self) -> bool {
        self.f.contains(Flags::HIDDEN)
    }

    // ---- status line -------------------------------------------------

    pub(crate) fn draw_msg(&mut self, s: &[u8]) {
        self.f.insert(Flags::MSG | Flags::REDRAW_NAV);
        self.rl.clear();
        self.rl.push_cl(s);
    }

    pub(crate) fn draw_err(&mut self, e: Error) {
        self.f.insert(Flags::MSG_ERR | Flags::REDRAW_NAV);
        self.rl.clear();
        self.rl.push_cl(b" error: ");
        self.rl.push_cl(e.as_str().as_bytes());
        let en = e.errno();
        if en != 0 {
            self.rl.push_cl(b": ");
            let s = unsafe { CStr::from_ptr(libc::strerror(en)) };
            self.rl.push_cl(s.to_bytes());
        }
    }

    // ---- filters -----------------------------------------------------

    /// Applies a filter with the current query halves, marking
    /// the directory pane for redraw.
    pub(crate) fn apply_filter(&mut self, f: Filter, inc: bool) {
        let show = self.hidden();
        if inc {
            self.dir.filter_apply_inc(f, show, self.rl.cl(), self.rl.cr());
        } else {
            self.dir.filter_apply(f, show, self.rl.cl(), self.rl.cr());
        }
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    /// Remembers the query for the nav bar.
    pub(crate) fn filter_save(&mut self) {
        self.vq.clear();
        self.vq.extend_from_slice(self.rl.cl());
        self.vq.extend_from_slice(self.rl.cr());
        self.vq.truncate(255);
    }

    pub(crate) fn filter_clear(&mut self) {
        let show = self.hidden();
        self.dir.filter_apply(Filter::Hidden, show, b"", b"");
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
        self.vq.clear();
        self.f.remove(Flags::SEARCH);
    }

    // ---- cursor ------------------------------------------------------

    /// Places the cursor at visible rank `y` with screen offset
    /// `o`, clamping both.
    pub(crate) fn cursor_set(&mut self, y: usize, o: usize) {
        if self.dir.vl == 0 || self.row == 0 {
            self.y = 0;
            self.o = 0;
            self.c = self.dir.next(0).unwrap_or(NONE);
            return;
        }
        let mut y = y;
        let mut o = o;
        if y >= self.dir.vl {
            y = self.dir.vl - 1;
        }
        if o >= self.row as usize {
            o = self.row as usize - 1;
        }
        if o > y {
            o = y;
        }
        self.y = y;
        self.o = o;
        self.c = self.dir.visible_select(y).unwrap_or(NONE);
    }

    /// Clamps the cursor after the visible set or screen shrank.
    pub(crate) fn cursor_sync(&mut self) {
        if self.dir.vl == 0 || self.row == 0 {
            self.y = 0;
            self.o = 0;
            self.c = NONE;
            return;
        }
        if self.y >= self.dir.vl {
            self.y = self.dir.vl - 1;
        }
        if self.o >= self.row as usize {
            self.o = self.row as usize - 1;
        }
        if self.o > self.y {
            self.o = self.y;
        }
        self.c = self.dir.visible_select(self.y).unwrap_or(NONE);
    }

    /// Centers the view on a named entry if it is visible.
    pub(crate) fn scroll_to(&mut self, d: &[u8]) {
        if self.dir.vl != 0 && !d.is_empty() {
            if let (_, Some(i)) = self.dir.ht_find(d) {
                if self.dir.vent(i).vis() {
                    let r = self.dir.rank(i);
                    let row = self.row as usize;
                    let ms = self.dir.vl.saturating_sub(row);
                    let h = row >> 1;
                    let mut s = if r + 2 <= row {
                        0
                    } else if r >= ms {
                        ms
                    } else if r > h {
                        r - h
                    } else {
                        0
                    };
                    if s > ms {
                        s = ms;
                    }
                    self.cursor_set(r, r - s);
                    return;
                }
            }
        }
        self.cursor_set(0, 0);
    }

    /// Moves the cursor to a visible rank, recentering when the
    /// jump is longer than a screen.  Returns the residual row
    /// delta for the minimal-scroll path.
    pub(crate) fn scroll_to_rank(&mut self, r: usize) -> i64 {
        let mut dy = r as i64 - self.y as i64;
        if dy == 0 || self.dir.vl == 0 {
            return 0;
        }
        let row = self.row as i64;
        if dy > row || dy < -row {
            let h = row >> 1;
            let mut j = r as i64 - if dy > 0 { h } else { -h };
            if j < 0 {
                j = 0;
            }
            if j >= self.dir.vl as i64 {
                j = self.dir.vl as i64 - 1;
            }
            self.cursor_set(j as usize, 0);
            self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
            dy = r as i64 - self.y as i64;
        }
        dy
    }

    // ---- paths -------------------------------------------------------

    fn path_save(&mut self) {
        self.ppwd.clear();
        self.ppwd.extend_from_slice(&self.pwd);
    }

    fn path_load(&mut self) {
        self.pwd.clear();
        self.pwd.extend_from_slice(&self.ppwd);
    }

    /// Clears any active search and persists marks before the
    /// cwd changes.  A materialisation failure vetoes the cd.
    fn path_change(&mut self) -> bool {
        self.filter_clear();
        if !self.mark_materialize() {
            self.draw_err(Error::MarkOomCd);
            return false;
        }
        true
    }

    /// Materialises the live marks into the persisted list when
    /// leaving the mark directory; all-or-nothing.
    pub(crate) fn mark_materialize(&mut self) -> bool {
        if self.dir.vml == 0 || self.dir.ml != 0 || self.mpwd.is_empty() {
            return true;
        }
        if self.mpwd != self.pwd {
            return true;
        }
        self.dir.mark_materialize()
    }

    /// Opens the directory named by `pwd`, swaps the directory
    /// fd, recomputes MARK_PWD, and chdirs the process there.
    fn path_open(&mut self) -> bool {
        let c = cstring(&self.pwd);
        let fd = unsafe {
            libc::open(
                c.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd == -1 {
            return false;
        }
        if self.dfd != libc::AT_FDCWD {
            unsafe { libc::close(self.dfd) };
        }
        self.dfd = fd;
        self.f.set(
            Flags::MARK_PWD,
            !self.mpwd.is_empty() && self.mpwd == self.pwd,
        );
        unsafe { libc::fchdir(fd) != -1 }
    }

    /// cd to an absolute path.
    pub(crate) fn path_cd(&mut self, d: &[u8]) -> bool {
        if !self.path_change() {
            return false;
        }
        self.path_save();
        self.pwd.clear();
        self.pwd.extend_from_slice(d);
        path_resolve(&mut self.pwd);
        if !self.path_open() {
            self.path_load();
            self.draw_err(Error::Cd(errno()));
            return false;
        }
        self.dir_load()
    }

    /// Initial cd: accepts a relative path and absolutises the
    /// recorded cwd afterwards.
    pub(crate) fn path_chdir(&mut self, d: &[u8]) -> bool {
        if !self.path_change() {
            return false;
        }
        self.path_save();
        self.pwd.clear();
        self.pwd.extend_from_slice(d);
        if !self.path_open() || !self.dir_load() {
            self.path_load();
            self.draw_err(Error::Cd(errno()));
            return false;
        }
        self.path_save();
        let mut buf = vec![0u8; 4096];
        let r = unsafe {
            libc::getcwd(buf.as_mut_ptr().cast(), buf.len())
        };
        if r.is_null() {
            self.path_load();
            self.draw_err(Error::Cd(errno()));
            return false;
        }
        let n = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(n);
        self.pwd = buf;
        true
    }

    /// cd to an entry of the current directory.
    pub(crate) fn path_cd_relative(&mut self, d: &[u8]) -> bool {
        if !self.path_change() {
            return false;
        }
        self.path_save();
        if self.pwd.len() > 1 {
            self.pwd.push(b'/');
        }
        self.pwd.extend_from_slice(d);
        path_resolve(&mut self.pwd);
        if !self.path_open() {
            self.path_load();
            self.draw_err(Error::Cd(errno()));
            return false;
        }
        self.dir_load()
    }

    /// cd to the parent; returns the name of the directory we
    /// left so the cursor can land on it.
    pub(crate) fn path_cd_up(&mut self) -> Option<Vec<u8>> {
        if !self.path_change() {
            return None;
        }
        self.path_save();
        let l = self.pwd.len();
        let mut i = l;
        while i > 1 && self.pwd[i - 1] != b'/' {
            i -= 1;
        }
        let n = if i > 1 { i - 1 } else { 1 };
        let saved = self.pwd.clone();
        self.pwd.truncate(n);
        if !self.path_open() {
            self.pwd = saved;
            self.draw_err(Error::Cd(errno()));
            return None;
        }
        if !self.dir_load() {
            return None;
        }
        Some(saved[i..l].to_vec())
    }

    // ---- directory ---------------------------------------------------

    fn dir_clear(&mut self) {
        self.y = 0;
        self.o = 0;
        self.c = 0;
        self.f.remove(Flags::TRUNC);
        self.rl.clear();
        self.dir.clear();
    }

    /// Sorts (unless truncated), refilters with the active
    /// query, and re-clamps the cursor.
    pub(crate) fn dir_sort(&mut self) {
        if !self.f.contains(Flags::TRUNC) {
            if let Some(f) = sort::sort_fn(self.ds) {
                self.dir.sort(f);
            }
        }
        let f = if self.rl.empty() { Filter::Hidden } else { self.sf };
        self.apply_filter(f, false);
        self.cursor_set(self.y, self.o);
    }

    /// Rebuilds the live mark tier after a (re)load.
    fn dir_marks_reload(&mut self) {
        if !self.f.contains(Flags::MARK_PWD) {
            return;
        }
        if self.dir.ml != 0 {
            self.dir.mark_rebuild();
        } else {
            // Live-only marks do not survive a reload.
            self.dir.mark_sync();
        }
    }

    /// Reads the whole directory through the open fd.
    pub(crate) fn dir_load(&mut self) -> bool {
        let d = unsafe {
            libc::openat(
                self.dfd,
                c".".as_ptr(),
                libc::O_RDONLY
                    | libc::O_DIRECTORY
                    | libc::O_CLOEXEC
                    | libc::O_NOFOLLOW,
            )
        };
        if d < 0 {
            return false;
        }
        let n = unsafe { libc::fdopendir(d) };
        if n.is_null() {
            unsafe { libc::close(d) };
            return false;
        }
        self.dir_clear();
        loop {
            let e = unsafe { libc::readdir(n) };
            if e.is_null() {
                break;
            }
            let name = unsafe { CStr::from_ptr((*e).d_name.as_ptr()) };
            if self.dir.load_ent(self.dfd, name) == Load::Full {
                self.f.insert(Flags::TRUNC);
                break;
            }
        }
        unsafe { libc::closedir(n) };
        self.dir_sort();
        self.dir_marks_reload();
        self.watch.watch(c".");
        true
    }

    /// Full reload keeping the cursor on the same entry name
    /// when it still exists.
    pub(crate) fn dir_refresh(&mut self) {
        let o = if self.c != NONE {
            self.dir.name(self.c).to_vec()
        } else {
            Vec::new()
        };
        self.dir_load();
        self.scroll_to(&o);
        self.cursor_sync();
        self.f.insert(Flags::DIRTY);
    }

    // ---- watch pump --------------------------------------------------

    fn watch_add(&mut self, n: &[u8]) {
        let c = cstring(n);
        match self.dir.add(self.dfd, &c, self.hidden()) {
            Load::Ok => self.f.insert(Flags::DIRTY),
            Load::Full => self.f.insert(Flags::TRUNC),
            Load::Skipped => {}
        }
    }

    fn watch_del(&mut self, n: &[u8]) {
        if self.dir.del(n) {
            self.f.insert(Flags::DIRTY);
        }
    }

    fn watch_handle(&mut self) {
        loop {
            let Some(e) = self.watch.pump() else { return };
            match e.delta {
                Delta::Overflow => {
                    self.dir_refresh();
                    return;
                }
                Delta::Add => self.watch_add(e.name()),
                Delta::Del => self.watch_del(e.name()),
                Delta::Modify => {
                    self.watch_del(e.name());
                    self.watch_add(e.name());
                }
            }
        }
    }

    /// One update pass: reap children, drain the watcher, and
    /// settle a dirty directory.
    pub(crate) fn update(&mut self) {
        Term::reap();
        self.watch_handle();
        if !self.f.contains(Flags::DIRTY) {
            return;
        }
        self.f.remove(Flags::DIRTY);
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
        self.dir_sort();
        if self.f.contains(Flags::MARK_PWD) {
            if self.dir.ml != 0 {
                self.dir.mark_rebuild();
            } else {
                self.dir.mark_sync();
            }
        }
        self.cursor_sync();
        if self.f.contains(Flags::DIRTY_WITHIN) && self.dir.st != 0 {
            let name = self.dir.name_at(self.dir.st).to_vec();
            self.scroll_to(&name);
            self.dir.st = 0;
            self.f.remove(Flags::DIRTY_WITHIN);
        }
    }

    // ---- terminal ----------------------------------------------------

    pub(crate) fn term_resize(&mut self) -> Result<()> {
        let (row, col) = self.term.size()?;
        self.row = if row > MARGIN { row - MARGIN } else { 1 };
        self.col = col;
        self.rl.set_vw(col as usize);
        vt::decstbm(&mut self.io, 1, self.row as u32);
        self.cursor_set(self.y, self.o);
        self.f.insert(Flags::REDRAW);
        Ok(())
    }

    pub(crate) fn term_raw_mode(&mut self) -> Result<()> {
        self.io.push(vt::ALT_SCREEN_Y);
        self.io.push(vt::DECTCEM_N);
        self.io.push(vt::DECAWM_N);
        self.io.push(vt::BPASTE_ON);
        self.io.push(vt::ED2);
        self.io.push(vt::CUP1);
        self.term.raw()?;
        self.term_resize()
    }

    pub(crate) fn term_cooked_mode(&mut self) -> Result<()> {
        vt::decstbm(&mut self.io, 1, (self.row + MARGIN) as u32);
        self.io.push(vt::SGR0);
        self.io.push(vt::BPASTE_OFF);
        self.io.push(vt::DECAWM_Y);
        self.io.push(vt::DECTCEM_Y);
        self.io.push(vt::ALT_SCREEN_N);
        self.io.flush_frame(self.term.fd);
        self.term.cooked()
    }

    // ---- child processes ---------------------------------------------

    /// Runs a child with the tty (or the null sink) on its
    /// output, flipping the terminal to cooked around
    /// foreground children.  Failures land in the status area.
    pub(crate) fn exec(
        &mut self,
        stdin: Option<i32>,
        dir: Option<&CStr>,
        argv: &[&CStr],
        bg: bool,
        tf: bool,
    ) -> bool {
        if tf {
            let _ = self.term_cooked_mode();
        }
        let out = if bg { self.term.null } else { self.term.fd };
        let r = exec::run_cmd(out, stdin, dir, argv, bg);
        if tf {
            let _ = self.term_raw_mode();
        }
        match r {
            Ok(_) => true,
            Err(e) => {
                self.draw_err(e);
                false
            }
        }
    }

    /// Enter on an entry: descend, pick, or open.
    pub(crate) fn open(&mut self) {
        if self.c == NONE {
            return;
        }
        let name = self.dir.name(self.c).to_vec();
        if name.is_empty() {
            return;
        }
        let k = self.dir.pent(self.c).kind();
        if k.is_dir() {
            self.path_cd_relative(&name);
        } else if self.f.contains(Flags::PICKER) {
            self.pwd.push(b'/');
            self.pwd.extend_from_slice(&name);
            self.f.insert(Flags::PRINT_PWD);
            self.term.set_dead(1);
        } else {
            let opener = cstring(&self.opener);
            let file = cstring(&name);
            self.exec(
                None,
                None,
                &[opener.as_c_str(), file.as_c_str()],
                false,
                true,
            );
        }
    }

    // ---- prompt plumbing ---------------------------------------------

    /// Arms a prompt (or immediately executes a prefilled
    /// command when the binding says so).
    pub(crate) fn cmd(&mut self, c: &CmdBind) {
        if c.press.is_none() && c.enter.is_none() {
            self.draw_err(Error::NoCallbacks);
            return;
        }
        self.rl.clear();
        self.rl.set_prompt(c.prompt);
        if !c.left.is_empty() {
            self.rl.push_cl(c.left);
        }
        if !c.right.is_empty() {
            self.rl.set_cr(c.right);
        }
        if c.config.contains(CmdFlags::FILE_CURSOR) {
            if self.c == NONE {
                return;
            }
            let e = self.dir.name(self.c).to_vec();
            self.rl.push_cl(&e);
        }
        self.rl.cl_sync();
        self.cf = c.config;
        self.kp = c.press;
        self.kd = c.enter;
        self.f.insert(Flags::REDRAW_CMD);
        if self.f.contains(Flags::ROOT)
            && !self.cf.contains(CmdFlags::EXEC_ROOT)
        {
            return;
        }
        if (self.cf.contains(CmdFlags::EXEC_MARK) && self.dir.vml > 0)
            || self.cf.contains(CmdFlags::EXEC)
        {
            self.rl.join();
            self.cmd_exec();
        }
    }

    /// Submits the joined prompt line to the armed callback.
    pub(crate) fn cmd_exec(&mut self) {
        if let Some(kd) = self.kd {
            let line = self.rl.cl().to_vec();
            let clear = match kd {
                Enter::Search => self.cmd_search(&line),
                Enter::Cd => self.cmd_cd(&line),
                Enter::Run => self.cmd_run(&line),
            };
            if clear {
                self.rl.clear();
            }
        }
        self.rl.vx = 0;
        self.rl.set_prompt(b"");
        self.kp = None;
        self.kd = None;
    }

    /// Content-change callback while a prompt is open.
    pub(crate) fn press_cb(&mut self, k: u32) {
        match self.kp {
            Some(Press::Search) => self.search_press(k),
            None => {}
        }
    }

    fn search_press(&mut self, k: u32) {
        let inc = self.rl.cl().len() > 1
            && k != key::BACKSPACE
            && self.dir.vl != self.dir.dl
            && self.rl.cr().is_empty();
        self.apply_filter(self.sf, inc);
        self.filter_save();
        self.cursor_set(0, 0);
    }

    /// Enter on the search prompt: open a unique match, keep
    /// the filter otherwise.
    fn cmd_search(&mut self, s: &[u8]) -> bool {
        if self.dir.vl == 1 {
            self.open();
        } else {
            if !s.is_empty() {
                let show = self.hidden();
                self.dir.filter_apply(self.sf, show, s, b"");
                self.filter_save();
            } else {
                let show = self.hidden();
                self.dir.filter_apply(Filter::Hidden, show, b"", b"");
            }
            self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
            self.cursor_set(0, 0);
        }
        false
    }

    fn cmd_cd(&mut self, s: &[u8]) -> bool {
        if s.is_empty() {
            return true;
        }
        if s[0] == b'/' {
            self.path_cd(s)
        } else {
            self.path_cd_relative(s)
        }
    }

    // ---- actions -----------------------------------------------------

    fn act_quit(&mut self) {
        self.term.set_dead(1);
    }

    fn act_quit_print_pwd(&mut self) {
        self.f.insert(Flags::PRINT_PWD);
        self.act_quit();
    }

    fn act_cd_home(&mut self) {
        let h = get_env("HOME", b"");
        if !h.is_empty() {
            self.path_cd(&h);
        }
    }

    fn act_cd_last(&mut self) {
        let p = self.ppwd.clone();
        self.path_cd(&p);
    }

    fn act_cd_mark_directory(&mut self) {
        if self.dir.vml == 0 && self.dir.ml == 0 {
            return;
        }
        let p = self.mpwd.clone();
        if !p.is_empty() {
            self.path_cd(&p);
        }
    }

    fn act_cd_trash(&mut self) {
        let e = get_env("DFM_TRASH_DIR", b"");
        if e.is_empty() {
            self.draw_err(Error::EnvUnset);
        } else {
            self.path_cd(&e);
        }
    }

    fn act_cd_bookmark(&mut self, n: u8) {
        let name = format!("DFM_BOOKMARK_{n}");
        let e = get_env(&name, b"");
        if e.is_empty() {
            self.draw_err(Error::EnvUnset);
        } else {
            self.path_cd(&e);
        }
    }

    /// Up one directory; inside an active search this instead
    /// cancels the search and keeps the cursor entry.
    fn act_cd_up(&mut self) {
        if self.f.contains(Flags::SEARCH) {
            self.rl.clear();
            self.filter_clear();
            if self.c == NONE {
                self.cursor_set(0, 0);
                return;
            }
            let Some(o) = self.dir.next(0) else { return };
            let c = self.dir.name(o).to_vec();
            self.scroll_to(&c);
            self.c = o;
            return;
        }
        let Some(b) = self.path_cd_up() else { return };
        if b.is_empty() {
            return;
        }
        self.scroll_to(&b);
        self.cursor_sync();
    }

    fn act_open(&mut self) {
        self.open();
    }

    fn act_view_next(&mut self) {
        self.dv = match self.dv {
            b's' => b'p',
            b'p' => b't',
            b't' => b'a',
            b'a' => b'n',
            _ => b's',
        };
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_sort_next(&mut self) {
        self.ds = match self.ds {
            b'N' => b's',
            b's' => b'S',
            b'S' => b'd',
            b'd' => b'D',
            b'D' => b'e',
            b'e' => b'n',
            _ => b'N',
        };
        self.dir_sort();
    }

    fn act_redraw(&mut self) {
        self.f.insert(Flags::REDRAW);
    }

    fn act_refresh(&mut self) {
        self.dir_refresh();
    }

    fn act_scroll_top(&mut self) {
        self.cursor_set(0, 0);
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_scroll_bottom(&mut self) {
        let vl = self.dir.vl;
        self.cursor_set(
            vl - (vl != 0) as usize,
            (self.row as usize).saturating_sub(1),
        );
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_page_down(&mut self) {
        if self.dir.vl == 0 {
            return;
        }
        let mut ny = self.y + self.row as usize;
        if ny >= self.dir.vl {
            ny = self.dir.vl - 1;
        }
        self.cursor_set(ny, (self.row as usize).saturating_sub(1));
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_page_up(&mut self) {
        if self.dir.vl == 0 {
            return;
        }
        let row = self.row as usize;
        let ny = if self.y > row { self.y - row } else { 0 };
        self.cursor_set(ny, 0);
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    /// One row down with a minimal repaint of the two rows
    /// involved.
    pub(crate) fn act_scroll_down(&mut self) {
        if self.y + 1 >= self.dir.vl {
            return;
        }
        let l = self.c;
        self.y += 1;
        if self.o < self.row as usize - 1 {
            self.o += 1;
        }
        let Some(n) = self.dir.next(self.c + 1) else { return };
        self.c = n;
        self.draw_ent(l);
        self.io.push(vt::LF);
        self.draw_ent(self.c);
        self.f.insert(Flags::REDRAW_NAV);
    }

    pub(crate) fn act_scroll_up(&mut self) {
        if self.y == 0 {
            return;
        }
        let l = self.c;
        self.y -= 1;
        let n =
            if self.c > 0 { self.dir.prev(self.c - 1) } else { None };
        let Some(n) = n else {
            self.y += 1;
            return;
        };
        self.c = n;
        self.draw_ent(l);
        if self.o == 0 {
            self.io.push(vt::IL0);
        } else {
            self.o -= 1;
            self.io.push(vt::CUU1);
        }
        self.draw_ent(self.c);
        self.f.insert(Flags::REDRAW_NAV);
    }

    /// Toggles dotfiles, keeping the cursor on the same entry.
    fn act_toggle_hidden(&mut self) {
        if self.c == NONE {
            return;
        }
        let c = self.dir.name(self.c).to_vec();
        if c.is_empty() {
            return;
        }
        self.f.toggle(Flags::HIDDEN);
        self.filter_clear();
        self.scroll_to(&c);
        self.cursor_sync();
    }

    fn act_search_startswith(&mut self) {
        self.sf = Filter::StartsWith;
        self.filter_clear();
        self.f.insert(Flags::SEARCH);
        self.cursor_set(0, 0);
        self.cmd(&CmdBind {
            prompt: b"/",
            left: b"",
            right: b"",
            press: Some(Press::Search),
            enter: Some(Enter::Search),
            config: CmdFlags::empty(),
        });
    }

    fn act_search_substring(&mut self) {
        self.sf = Filter::Substr;
        self.filter_clear();
        self.f.insert(Flags::SEARCH);
        self.cursor_set(0, 0);
        self.cmd(&CmdBind {
            prompt: b"/*",
            left: b"",
            right: b"",
            press: Some(Press::Search),
            enter: Some(Enter::Search),
            config: CmdFlags::empty(),
        });
    }

    fn act_escape(&mut self) {
        if !self.f.contains(Flags::SEARCH) {
            self.f.remove(Flags::ERROR);
            self.f.insert(Flags::REDRAW_NAV);
            return;
        }
        self.act_cd_up();
    }

    fn act_shell(&mut self) {
        let sh = get_env("SHELL", SHELL_DEFAULT);
        let shc = cstring(&sh);
        self.exec(None, None, &[shc.as_c_str()], false, true);
    }

    /// Flips to the primary screen until a key is pressed.
    fn act_alt_buffer(&mut self) {
        self.io.push(vt::ALT_SCREEN_N);
        self.io.flush_frame(self.term.fd);
        key::read_key(self.term.fd);
        self.io.push(vt::ALT_SCREEN_Y);
        self.io.flush_frame(self.term.fd);
        self.f.remove(Flags::ERROR);
        self.f.insert(Flags::REDRAW);
    }

    /// Pipes the cwd string into the copy helper.
    fn act_copy_pwd(&mut self) {
        match exec::fd_from_buf(&self.pwd) {
            Err(e) => self.draw_err(e),
            Ok(fd) => {
                let cp = get_env("DFM_COPYER", COPYER_DEFAULT);
                let cpc = cstring(&cp);
                self.exec(Some(fd), None, &[cpc.as_c_str()], true, false);
                unsafe { libc::close(fd) };
                self.draw_msg(b"Copied PWD to clipboard");
            }
        }
    }

    fn act_mark_toggle(&mut self) {
        if self.c == NONE {
            return;
        }
        if !self.f.contains(Flags::MARK_PWD) {
            self.mark_clear();
        }
        self.mark_init();
        self.dir.mark_toggle_idx(self.c);
        self.dir.mark_invalidate();
        let c = self.c;
        self.draw_ent(c);
        self.f.insert(Flags::REDRAW_NAV | Flags::REDRAW_FLUSH);
    }

    fn act_mark_toggle_all(&mut self) {
        let Some(i) = self.dir.next(0) else { return };
        let pre = self.dir.vent(i).mark();
        self.mark_clear();
        if !pre {
            self.mark_init();
            self.dir.vml = 0;
            for b in 0..crate::bitset::words(self.dir.dl) {
                self.dir.vm[b] = self.dir.v[b];
                self.dir.vml += self.dir.vm[b].count_ones() as usize;
            }
            self.dir.mark_apply_bitset();
            self.dir.ml = 0;
        }
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_mark_clear(&mut self) {
        self.mark_clear();
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    fn act_mark_next(&mut self) {
        if self.dir.vml == 0 || self.c == NONE {
            return;
        }
        let Some(b) = self.dir.mark_find(self.c, true) else { return };
        let r = self.dir.rank(b);
        let mut y = self.scroll_to_rank(r);
        while y > 0 {
            self.act_scroll_down();
            y -= 1;
        }
    }

    fn act_mark_prev(&mut self) {
        if self.dir.vml == 0 || self.c == NONE {
            return;
        }
        let Some(b) = self.dir.mark_find(self.c, false) else { return };
        let r = self.dir.rank(b);
        let mut y = self.scroll_to_rank(r);
        while y < 0 {
            self.act_scroll_up();
            y += 1;
        }
    }

    fn act_mark_invert(&mut self) {
        if self.dir.vl == 0 {
            return;
        }
        if !self.f.contains(Flags::MARK_PWD) {
            self.mark_clear();
            self.mark_init();
        }
        self.dir.vml = 0;
        for b in 0..crate::bitset::words(self.dir.dl) {
            self.dir.vm[b] = self.dir.v[b] & !self.dir.vm[b];
            self.dir.vml += self.dir.vm[b].count_ones() as usize;
        }
        self.dir.mark_apply_bitset();
        for b in 0..crate::bitset::words(self.dir.dl) {
            let mut cl = self.dir.v[b] & !self.dir.vm[b];
            while cl != 0 {
                let i = (b << 6) + cl.trailing_zeros() as usize;
                cl &= cl - 1;
                if i >= self.dir.dl {
                    break;
                }
                let x = self.dir.vent(i).with_mark(false);
                self.dir.set_vent(i, x);
            }
        }
        self.dir.mark_invalidate();
        self.f.insert(Flags::REDRAW_DIR | Flags::REDRAW_NAV);
    }

    /// Forgets the mark set and its directory.
    pub(crate) fn mark_clear(&mut self) {
        self.dir.mark_clear_all();
        self.mpwd.clear();
        self.f.remove(Flags::MARK_PWD);
    }

    /// Adopts the cwd as the mark directory.
    fn mark_init(&mut self) {
        self.mpwd.clear();
        self.mpwd.extend_from_slice(&self.pwd);
        self.f.insert(Flags::MARK_PWD);
    }

    /// Full-screen stat overlay for the cursor entry.
    fn act_stat(&mut self) {
        if self.c == NONE {
            return;
        }
        let name = self.dir.name(self.c).to_vec();
        self.stat_overlay(&name);
    }

    // ---- bound file commands -----------------------------------------

    fn act_cmd_prompt(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::MUT,
        });
    }

    fn act_cmd_shell_prompt(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"!",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::MUT,
        });
    }

    fn act_cmd_cd_prompt(&mut self) {
        self.cmd(&CmdBind {
            prompt: b"cd ",
            left: b"",
            right: b"",
            press: None,
            enter: Some(Enter::Cd),
            config: CmdFlags::empty(),
        });
    }

    fn act_file_copy(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"cp -R %m %d",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::CONFLICT
                | CmdFlags::MUT
                | CmdFlags::NOT_MARK_DIR
                | CmdFlags::EXEC,
        });
    }

    fn act_file_move(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"mv %m %d",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::CONFLICT
                | CmdFlags::MUT
                | CmdFlags::NOT_MARK_DIR
                | CmdFlags::EXEC,
        });
    }

    fn act_file_trash(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"$DFM_TRASH %m",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::MUT
                | CmdFlags::MARK_DIR
                | CmdFlags::EXEC_MARK,
        });
    }

    fn act_file_delete(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"rm -rf %m",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::MUT | CmdFlags::MARK_DIR,
        });
    }

    fn act_file_rename(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"mv %f ",
            right: b"",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::MUT
                | CmdFlags::CONFLICT
                | CmdFlags::FILE_CURSOR,
        });
    }

    fn act_file_open_with(&mut self) {
        self.cmd(&CmdBind {
            prompt: b":",
            left: b"",
            right: b" %f",
            press: None,
            enter: Some(Enter::Run),
            config: CmdFlags::empty(),
        });
    }

    // ---- input-mode handlers -----------------------------------------

    fn input_move_beginning(&mut self) {
        match self.rl.home() {
            Outcome::Full => self.f.insert(Flags::REDRAW_CMD),
            Outcome::Partial => {
                self.io.push(vt::CR);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            Outcome::None => {}
        }
    }

    fn input_move_end(&mut self) {
        match self.rl.end() {
            Outcome::Full => self.f.insert(Flags::REDRAW_CMD),
            Outcome::Partial => {
                self.io.push(vt::CR);
                vt::cuf(&mut self.io, self.rl.vx as u32);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            Outcome::None => {}
        }
    }

    fn input_move_left(&mut self) {
        match self.rl.left() {
            (Outcome::Full, _) => self.f.insert(Flags::REDRAW_CMD),
            (Outcome::Partial, n) => {
                vt::cub(&mut self.io, n as u32);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            (Outcome::None, _) => {}
        }
    }

    fn input_move_right(&mut self) {
        match self.rl.right() {
            (Outcome::Full, _) => self.f.insert(Flags::REDRAW_CMD),
            (Outcome::Partial, n) => {
                vt::cuf(&mut self.io, n as u32);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            (Outcome::None, _) => {}
        }
    }

    fn input_move_word_left(&mut self) {
        if self.rl.word_left() != Outcome::None {
            self.f.insert(Flags::REDRAW_CMD);
        }
    }

    fn input_move_word_right(&mut self) {
        if self.rl.word_right() != Outcome::None {
            self.f.insert(Flags::REDRAW_CMD);
        }
    }

    fn input_delete_to_end(&mut self) {
        if self.rl.delete_right() == Outcome::None {
            return;
        }
        self.io.push(vt::EL0);
        self.f.insert(Flags::REDRAW_FLUSH);
        self.press_cb(key::BACKSPACE);
    }

    fn input_delete_to_beginning(&mut self) {
        if self.rl.delete_left() == Outcome::None {
            return;
        }
        self.f.insert(Flags::REDRAW_CMD);
        self.press_cb(key::BACKSPACE);
    }

    fn input_delete(&mut self) {
        match self.rl.delete() {
            (Outcome::Full, _) => self.f.insert(Flags::REDRAW_CMD),
            (Outcome::Partial, n) => {
                vt::dch(&mut self.io, n as u32);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            (Outcome::None, _) => return,
        }
        self.press_cb(key::BACKSPACE);
    }

    fn input_delete_word_left(&mut self) {
        if self.rl.delete_word_prev() == Outcome::None {
            return;
        }
        self.f.insert(Flags::REDRAW_CMD);
        self.press_cb(key::BACKSPACE);
    }

    fn input_delete_word_right(&mut self) {
        if self.rl.delete_word_right() == Outcome::None {
            return;
        }
        self.f.insert(Flags::REDRAW_CMD);
        self.press_cb(key::BACKSPACE);
    }

    fn input_backspace(&mut self) {
        match self.rl.backspace() {
            (Outcome::Full, _) => self.f.insert(Flags::REDRAW_CMD),
            (Outcome::Partial, n) => {
                vt::cub(&mut self.io, n as u32);
                vt::dch(&mut self.io, n as u32);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            (Outcome::None, _) => return,
        }
        self.press_cb(key::BACKSPACE);
    }

    fn input_cancel(&mut self) {
        self.rl.clear();
        self.kp = None;
        self.kd = None;
        self.io.push(vt::EL2);
        self.f.insert(Flags::REDRAW_NAV);
    }

    fn input_submit(&mut self) {
        self.rl.join();
        self.cmd_exec();
        self.rl.vx = 0;
        self.io.push(vt::EL2);
        self.f.insert(Flags::REDRAW_NAV);
    }

    fn input_insert(&mut self) {
        let k = self.key;
        match self.rl.insert(k.c & key::TXT_MASK, &k.b[..k.l]) {
            (Outcome::Full, _) => self.f.insert(Flags::REDRAW_CMD),
            (Outcome::Partial, n) => {
                vt::ich(&mut self.io, n as u32);
                self.io.push(&k.b[..k.l]);
                self.f.insert(Flags::REDRAW_FLUSH);
            }
            (Outcome::None, _) => return,
        }
        self.press_cb(k.c);
    }

    /// Bracketed paste: insert until the end marker, folding
    /// newline runs into single spaces.
    fn input_insert_paste(&mut self) {
        let mut squash = false;
        loop {
            let Some(mut k) = key::read_key(self.term.fd) else { return };
            if k.c == key::PASTE_END {
                return;
            }
            if k.b[0] == b'\r' || k.b[0] == b'\n' {
                if squash {
                    continue;
                }
                k.c = b' ' as u32;
                k.b[0] = b' ';
                squash = true;
            } else {
                squash = false;
            }
            if key::get_mod(k.c) != 0 || key::is_sym(k.c) || k.c < 32 {
                continue;
            }
            self.key = k;
            self.input_insert();
        }
    }

    // ---- dispatch ----------------------------------------------------

    fn input_key(&mut self, k: u32) {
        const CTRL_A: u32 = key::key(key::MOD_CTRL, 'a' as u32);
        const CTRL_B: u32 = key::key(key::MOD_CTRL, 'b' as u32);
        const CTRL_E: u32 = key::key(key::MOD_CTRL, 'e' as u32);
        const CTRL_F: u32 = key::key(key::MOD_CTRL, 'f' as u32);
        const CTRL_K: u32 = key::key(key::MOD_CTRL, 'k' as u32);
        const CTRL_U: u32 = key::key(key::MOD_CTRL, 'u' as u32);
        const CTRL_W: u32 = key::key(key::MOD_CTRL, 'w' as u32);
        const ALT_B: u32 = key::key(key::MOD_ALT, 'b' as u32);
        const ALT_D: u32 = key::key(key::MOD_ALT, 'd' as u32);
        const ALT_F: u32 = key::key(key::MOD_ALT, 'f' as u32);
        match k {
            key::ESCAPE => self.input_cancel(),
            key::ENTER => self.input_submit(),
            key::BACKSPACE => self.input_backspace(),
            key::DELETE => self.input_delete(),
            key::LEFT | CTRL_B => self.input_move_left(),
            key::RIGHT | CTRL_F => self.input_move_right(),
            key::HOME | CTRL_A => self.input_move_beginning(),
            key::END | CTRL_E => self.input_move_end(),
            CTRL_U => self.input_delete_to_beginning(),
            CTRL_K => self.input_delete_to_end(),
            CTRL_W => self.input_delete_word_left(),
            ALT_D => self.input_delete_word_right(),
            ALT_B => self.input_move_word_left(),
            ALT_F => self.input_move_word_right(),
            key::PASTE => self.input_insert_paste(),
            _ => {
                if key::get_mod(k) == 0 && !key::is_sym(k) && k >= 32 {
                    self.input_insert();
                }
            }
        }
    }

    fn action_key(&mut self, k: u32) {
        const CTRL_D: u32 = key::key(key::MOD_CTRL, 'd' as u32);
        const CTRL_U: u32 = key::key(key::MOD_CTRL, 'u' as u32);
        const CTRL_L: u32 = key::key(key::MOD_CTRL, 'l' as u32);
        const Q: u32 = 'q' as u32;
        match k {
            _ if k == Q => self.act_quit(),
            _ if k == 'Q' as u32 => self.act_quit_print_pwd(),
            key::ENTER => self.act_open(),
            _ if k == 'l' as u32 => self.act_open(),
            key::RIGHT => self.act_open(),
            _ if k == 'h' as u32 => self.act_cd_up(),
            key::LEFT | key::BACKSPACE => self.act_cd_up(),
            _ if k == 'j' as u32 => self.act_scroll_down(),
            key::DOWN => self.act_scroll_down(),
            _ if k == 'k' as u32 => self.act_scroll_up(),
            key::UP => self.act_scroll_up(),
            _ if k == 'g' as u32 => self.act_scroll_top(),
            key::HOME => self.act_scroll_top(),
            _ if k == 'G' as u32 => self.act_scroll_bottom(),
            key::END => self.act_scroll_bottom(),
            key::PAGE_DOWN | CTRL_D => self.act_page_down(),
            key::PAGE_UP | CTRL_U => self.act_page_up(),
            _ if k == '.' as u32 => self.act_toggle_hidden(),
            _ if k == '/' as u32 => self.act_search_startswith(),
            _ if k == '?' as u32 => self.act_search_substring(),
            _ if k == ':' as u32 => self.act_cmd_prompt(),
            _ if k == '!' as u32 => self.act_cmd_shell_prompt(),
            _ if k == 'c' as u32 => self.act_cmd_cd_prompt(),
            _ if k == 's' as u32 => self.act_sort_next(),
            _ if k == 'v' as u32 => self.act_view_next(),
            _ if k == 'r' as u32 => self.act_refresh(),
            CTRL_L => self.act_redraw(),
            _ if k == ' ' as u32 => self.act_mark_toggle(),
            _ if k == 'a' as u32 => self.act_mark_toggle_all(),
            _ if k == 'I' as u32 => self.act_mark_invert(),
            _ if k == 'u' as u32 => self.act_mark_clear(),
            _ if k == 'n' as u32 => self.act_mark_next(),
            _ if k == 'N' as u32 => self.act_mark_prev(),
            _ if k == 'i' as u32 => self.act_stat(),
            _ if k == 'S' as u32 => self.act_shell(),
            _ if k == 'y' as u32 => self.act_copy_pwd(),
            _ if k == '`' as u32 => self.act_alt_buffer(),
            _ if k == 'P' as u32 => self.act_file_copy(),
            _ if k == 'V' as u32 => self.act_file_move(),
            _ if k == 'D' as u32 => self.act_file_trash(),
            _ if k == 'x' as u32 => self.act_file_delete(),
            _ if k == 'R' as u32 => self.act_file_rename(),
            _ if k == 'o' as u32 => self.act_file_open_with(),
            _ if k == '~' as u32 => self.act_cd_home(),
            _ if k == '-' as u32 => self.act_cd_last(),
            _ if k == '\'' as u32 => self.act_cd_mark_directory(),
            _ if k == 'T' as u32 => self.act_cd_trash(),
            _ if k < 128 && (b'0'..=b'9').contains(&(k as u8)) => {
                self.act_cd_bookmark(k as u8 - b'0')
            }
            key::ESCAPE => self.act_escape(),
            _ => {}
        }
    }

    fn input(&mut self) {
        let Some(k) = key::read_key(self.term.fd) else { return };
        self.key = k;
        if self.rl.prompt_len() != 0 {
            self.input_key(k.c);
        } else {
            self.action_key(k.c);
        }
    }

    // ---- main loop ---------------------------------------------------

    pub fn run(&mut self) -> Result<()> {
        self.term_raw_mode()?;
        while !self.term.dead() {
            self.update();
            self.draw();
            let e = self.term.wait(self.watch.fd());
            if e.contains(Wait::WCH) {
                if let Err(err) = self.term_resize() {
                    self.draw_err(err);
                }
            }
            if e.contains(Wait::KEY) {
                self.input();
            }
        }
        let _ = self.term_cooked_mode();
        if !self.f.contains(Flags::PRINT_PWD) {
            self.pwd.clear();
        }
        Ok(())
    }
}

impl Drop for Fm {
    fn drop(&mut self) {
        if self.dfd != libc::AT_FDCWD {
            unsafe { libc::close(self.dfd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_paths() {
        let mut p = b"/a/b/../c/./d".to_vec();
        path_resolve(&mut p);
        assert_eq!(p, b"/a/c/d");

        let mut p = b"/a/b/..".to_vec();
        path_resolve(&mut p);
        assert_eq!(p, b"/a");

        let mut p = b"/../..".to_vec();
        path_resolve(&mut p);
        assert_eq!(p, b"/");

        let mut p = b"/".to_vec();
        path_resolve(&mut p);
        assert_eq!(p, b"/");

        let mut p = b"/a//b///".to_vec();
        path_resolve(&mut p);
        assert_eq!(p, b"/a/b");
    }

    #[test]
    fn env_fallback() {
        assert_eq!(
            get_env("DFM_SURELY_UNSET_VAR_X", b"fallback"),
            b"fallback"
        );
    }

    #[test]
    fn cstrings_stop_at_nul() {
        assert_eq!(cstring(b"abc").as_bytes(), b"abc");
        assert_eq!(cstring(b"ab\0cd").as_bytes(), b"ab");
    }
}
