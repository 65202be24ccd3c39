// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The drawer.  Frames are composed into the shared output
//! buffer and written in one burst between synchronized-update
//! markers: the directory pane row by row, the nav bar, the
//! command line, and the one-frame message overlay.  Wide-name
//! truncation lengths are memoised in the lookup table.

use crate::dir::NONE;
use crate::ent::{self, Kind};
use crate::fm::{Flags, Fm, MARGIN};
use crate::key;
use crate::lookup;
use crate::utf8;
use crate::vt;

const COL_DIR: &[u8] = b"\x1b[1;34m";
const COL_LNK: &[u8] = b"\x1b[36m";
const COL_LNK_DIR: &[u8] = b"\x1b[1;36m";
const COL_LNK_BRK: &[u8] = b"\x1b[1;31m";
const COL_REG_EXEC: &[u8] = b"\x1b[32m";
const COL_FIFO: &[u8] = b"\x1b[33m";
const COL_SOCK: &[u8] = b"\x1b[35m";
const COL_SPEC: &[u8] = b"\x1b[1;33m";
const COL_UNKNOWN: &[u8] = b"\x1b[31m";
const COL_CURSOR: &[u8] = b"\x1b[7m";
const COL_MARK: &[u8] = b"\x1b[1;33m";
const COL_NAV: &[u8] = b"\x1b[7m";
const COL_NAV_ROOT: &[u8] = b"\x1b[7;31m";
const COL_NAV_ERR: &[u8] = b"\x1b[41;37m";
const COL_NAV_MSG: &[u8] = b"\x1b[7;33m";
const COL_NAV_MARK: &[u8] = b"\x1b[1;33;7m";

impl Fm {
    /// Byte length of `de[start..start+len]` truncated to `c`
    /// columns.  ASCII is trivial; narrow UTF-8 scans; wide
    /// names go through the memo keyed on name, width, and view
    /// mode.
    pub(crate) fn trunc_name(
        &mut self,
        start: usize,
        len: usize,
        is_utf8: bool,
        wide: bool,
        c: usize,
    ) -> usize {
        if c == 0 {
            return 0;
        }
        if len < c {
            return len;
        }
        if !is_utf8 {
            return len.min(c);
        }
        if !wide {
            return utf8::trunc_narrow(&self.dir.de[start..start + len], c);
        }
        let h = lookup::cache_hash(
            &self.dir.de[start..start + len],
            self.col,
            self.dv,
        );
        if let Some(l) = self.dir.cache_lookup(h) {
            return (l as usize).min(len);
        }
        let tl = utf8::trunc_wide(&self.dir.de[start..start + len], c);
        self.dir.cache_store(h, tl as u16);
        tl
    }

    /// One directory row: columns per the view mode, a color by
    /// type, the mark prefix, the truncated name, the type
    /// suffix, and the link target.
    pub(crate) fn draw_ent(&mut self, n: usize) {
        if n == NONE || n >= self.dir.dl {
            return;
        }
        let e = self.dir.pent(n);
        let o = self.dir.vent(n).off() as usize;
        let t = e.kind();
        let mut vw = self.col as i64;

        match self.dv {
            b's' => {
                vw -= 7;
                ent::size_push(&mut self.io, e.size(), 6, t.is_lnk());
            }
            b'p' => {
                vw -= 11;
                ent::perm_push(
                    &mut self.io,
                    e.perm() as u32,
                    t == Kind::Dir,
                );
            }
            b't' => {
                vw -= 8;
                ent::time_push(&mut self.io, e.age());
            }
            b'a' => {
                vw -= 26;
                ent::perm_push(
                    &mut self.io,
                    e.perm() as u32,
                    t == Kind::Dir,
                );
                ent::time_push(&mut self.io, e.age());
                ent::size_push(&mut self.io, e.size(), 6, t.is_lnk());
            }
            _ => {}
        }

        match t {
            Kind::Dir => {
                self.io.push(COL_DIR);
                vw -= 1;
            }
            Kind::Fifo => self.io.push(COL_FIFO),
            Kind::Lnk => self.io.push(COL_LNK),
            Kind::LnkBrk => self.io.push(COL_LNK_BRK),
            Kind::LnkDir => self.io.push(COL_LNK_DIR),
            Kind::RegExec => {
                self.io.push(COL_REG_EXEC);
                vw -= 1;
            }
            Kind::Sock => self.io.push(COL_SOCK),
            Kind::Spec => self.io.push(COL_SPEC),
            Kind::Unknown => self.io.push(COL_UNKNOWN),
            Kind::Reg => {}
        }

        let m = self.f.contains(Flags::MARK_PWD)
            && self.dir.vml > 0
            && self.dir.vent(n).mark();
        if m {
            self.io.push(COL_MARK);
            self.io.push_b(b' ');
            vw -= 2;
        }
        if self.c == n {
            self.io.push(COL_CURSOR);
        }

        let l = e.len() as usize;
        let c = self.trunc_name(
            o,
            l,
            e.utf8(),
            e.wide(),
            if vw < 0 { 0 } else { vw as usize },
        );
        self.io.push_sanitized(&self.dir.de[o..o + c]);

        match t {
            Kind::Dir | Kind::LnkDir => self.io.push_b(b'/'),
            Kind::RegExec => self.io.push_b(b'*'),
            _ => {}
        }
        if m {
            self.io.push_b(b'*');
        }

        if t.is_lnk() {
            let sl = e.size() as usize;
            vw -= c as i64 + 4;
            if vw > 0 {
                self.io.push(vt::SGR0);
                self.io.push(b" -> ");
                if sl != 0 {
                    let ts = o + l + 2;
                    let meta = ent::LnkMeta(self.dir.de[ts - 1]);
                    let tc = self.trunc_name(
                        ts,
                        sl,
                        meta.utf8(),
                        meta.wide(),
                        vw as usize,
                    );
                    self.io.push_sanitized(&self.dir.de[ts..ts + tc]);
                } else {
                    self.io.push_b(b'?');
                }
            }
        }

        self.io.push(vt::SGR0);
        self.io.push(vt::EL0);
        self.io.push(vt::CR);
    }

    /// The directory pane: up to `row` visible entries starting
    /// at the scroll offset, blank rows below.
    fn draw_dir(&mut self) {
        let s = if self.y >= self.o { self.y - self.o } else { 0 };
        let m = self.dir.vl.saturating_sub(s);
        let d = m.min(self.row as usize);
        let mut c = self.dir.visible_select(s);
        self.io.push(vt::CUP1);
        let mut i = 0;
        while i < d {
            let Some(k) = c else { break };
            self.draw_ent(k);
            self.io.push(vt::CUD1);
            c = self.dir.next(k + 1);
            i += 1;
        }
        for _ in i..self.row as usize {
            self.io.push(vt::EL2);
            self.io.push(vt::CUD1);
        }
    }

    fn draw_nav_begin(&mut self, color: &[u8]) {
        vt::cup(&mut self.io, 0, (self.row + MARGIN - 1) as u32);
        self.io.push(color);
        self.io.memset(b' ', self.col as usize);
        self.io.push(vt::CR);
    }

    pub(crate) fn draw_nav_begin_err(&mut self) {
        self.draw_nav_begin(COL_NAV_ERR);
    }

    pub(crate) fn draw_nav_end(&mut self) {
        self.io.push(vt::SGR0);
    }

    /// The nav bar: rank/total, status cell, mark count, total
    /// size, cwd, and the active query.
    fn draw_inf(&mut self) {
        let color = if self.f.intersects(Flags::TRUNC | Flags::ERROR) {
            COL_NAV_ERR
        } else if self.f.contains(Flags::ROOT) {
            COL_NAV_ROOT
        } else {
            COL_NAV
        };
        self.draw_nav_begin(color);
        self.io.push_b(b' ');
        self.io
            .push_u64((self.y + (self.dir.vl != 0) as usize) as u64);
        self.io.push_b(b'/');
        self.io.push_u64(self.dir.vl as u64);
        self.io.push_b(b' ');

        self.io.push_b(b'[');
        if self.f.contains(Flags::ROOT) {
            self.io.push_b(b'R');
        }
        if self.f.contains(Flags::TRUNC) {
            self.io.push_b(b'T');
        } else {
            self.io.push_b(self.ds);
        }
        if self.f.contains(Flags::ERROR) {
            self.io.push_b(b'E');
        }
        if self.f.contains(Flags::HIDDEN) {
            self.io.push_b(b'H');
        }
        self.io.push(b"] ");

        if self.dir.vml > 0 {
            self.io.push(COL_NAV_MARK);
            self.io.push_b(b' ');
            self.io.push_u64(self.dir.vml as u64);
            self.io.push(b" marked ");
            self.io.push(vt::SGR0);
            self.io.push(color);
            self.io.push_b(b' ');
        }

        if !self.f.contains(Flags::TRUNC) {
            self.io.push_b(b'~');
            ent::size_push(&mut self.io, self.dir.du, 0, false);
            self.io.push_b(b' ');
        }

        let pl = self.pwd.len().min(self.col as usize);
        self.io.push_sanitized(&self.pwd[..pl]);

        if self.f.contains(Flags::SEARCH) {
            self.io.push(b"/\x1b[1m");
            if self.sf == crate::filter::Filter::Substr {
                self.io.push_b(b'*');
            }
            self.io.push_sanitized(&self.vq);
            self.io.push(b"*");
            self.io.push(vt::SGR0);
        }

        self.draw_nav_end();
    }

    /// A one-frame message or error overlay in the nav row.
    fn draw_buf(&mut self, color: &[u8]) {
        self.draw_nav_begin(color);
        self.io.push_sanitized(self.rl.cl());
        self.draw_nav_end();
    }

    fn draw_nav(&mut self) {
        if self.f.intersects(Flags::MSG | Flags::MSG_ERR) {
            let color = if self.f.contains(Flags::MSG) {
                COL_NAV_MSG
            } else {
                COL_NAV_ERR
            };
            self.draw_buf(color);
            self.rl.clear();
            self.f.remove(Flags::MSG | Flags::MSG_ERR);
        } else {
            self.draw_inf();
        }
    }

    fn draw_cmd(&mut self) {
        vt::cup(&mut self.io, 0, (self.row + MARGIN) as u32);
        self.rl.write_visible(&mut self.io);
        self.io.push(vt::EL0);
    }

    /// Emits every dirty region, parks the terminal cursor, and
    /// flushes the frame.
    pub(crate) fn draw(&mut self) {
        if (self.f & Flags::REDRAW) == Flags::REDRAW {
            self.io.push(vt::ED2);
            self.dir.ht_clear_cache();
        }
        if self.f.contains(Flags::REDRAW_DIR) {
            self.draw_dir();
        }
        if self.f.contains(Flags::REDRAW_NAV) {
            self.draw_nav();
        }
        if self.f.contains(Flags::REDRAW_CMD) {
            self.draw_cmd();
        }
        if self.f.intersects(Flags::REDRAW) {
            if self.kp.is_some() || self.kd.is_some() {
                vt::cup(
                    &mut self.io,
                    self.rl.vx as u32,
                    (self.row + MARGIN) as u32,
                );
                self.io.push(vt::DECTCEM_Y);
            } else {
                vt::cup(&mut self.io, 0, self.o as u32 + 1);
                self.io.push(vt::DECTCEM_N);
            }
            self.io.flush_frame(self.term.fd);
        }
        self.f.remove(Flags::REDRAW);
    }

    /// Full-screen stat display for one entry; any key returns.
    pub(crate) fn stat_overlay(&mut self, name: &[u8]) {
        let c = crate::fm::cstring(name);
        let mut st = core::mem::MaybeUninit::<libc::stat>::uninit();
        let r = unsafe {
            libc::fstatat(
                self.dfd,
                c.as_ptr(),
                st.as_mut_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if r == -1 {
            self.draw_err(crate::result::Error::Stat(
                crate::result::errno(),
            ));
            return;
        }
        let st = unsafe { st.assume_init() };

        self.io.push(vt::ED2);
        self.io.push(vt::CUP1);

        self.io.push(b"Name:   ");
        self.io.push_sanitized(name);
        self.stat_nl();

        self.io.push(b"Type:   ");
        let t: &[u8] = match st.st_mode & libc::S_IFMT {
            libc::S_IFREG
                if st.st_mode
                    & (libc::S_IXUSR | libc::S_IXGRP | libc::S_IXOTH)
                    != 0 =>
            {
                b"executable file"
            }
            libc::S_IFREG => b"regular file",
            libc::S_IFDIR => b"directory",
            libc::S_IFLNK => b"symlink",
            libc::S_IFCHR => b"char device",
            libc::S_IFBLK => b"block device",
            libc::S_IFIFO => b"fifo",
            libc::S_IFSOCK => b"socket",
            _ => b"unknown",
        };
        self.io.push(t);
        self.stat_nl();

        if st.st_mode & libc::S_IFMT == libc::S_IFLNK {
            let mut b = [0u8; 4096];
            let r = unsafe {
                libc::readlinkat(
                    self.dfd,
                    c.as_ptr(),
                    b.as_mut_ptr().cast(),
                    b.len() - 1,
                )
            };
            if r >= 0 {
                self.io.push(b"Target: ");
                let n = r as usize;
                self.io.push_sanitized(&b[..n]);
                self.stat_nl();
            }
        }

        self.io.push(b"Size:   ");
        self.io.push_u64(st.st_size as u64);
        self.stat_nl();

        self.io.push(b"Mode:   0");
        self.io.push_octal((st.st_mode & 0o7777) as u32);
        self.io.push(b", ");
        ent::perm_push(
            &mut self.io,
            (st.st_mode & 0o7777) as u32,
            st.st_mode & libc::S_IFMT == libc::S_IFDIR,
        );
        self.stat_nl();

        self.io.push(b"UID:    ");
        self.io.push_u64(st.st_uid as u64);
        self.stat_nl();
        self.io.push(b"GID:    ");
        self.io.push_u64(st.st_gid as u64);
        self.stat_nl();
        self.io.push(b"Links:  ");
        self.io.push_u64(st.st_nlink as u64);
        self.stat_nl();
        self.io.push(b"Blocks: ");
        self.io.push_u64(st.st_blocks as u64);
        self.stat_nl();
        self.io.push(b"Inode:  ");
        self.io.push_u64(st.st_ino as u64);
        self.stat_nl();
        self.io.push(b"Device: ");
        self.io.push_u64(st.st_dev as u64);
        self.stat_nl();

        self.io.push(b"Access: ");
        self.stat_time(st.st_atime as i64);
        self.stat_nl();
        self.io.push(b"Modify: ");
        self.stat_time(st.st_mtime as i64);
        self.stat_nl();
        self.io.push(b"Change: ");
        self.stat_time(st.st_ctime as i64);
        self.stat_nl();

        self.stat_nl();
        self.io.push(b"Press any key...");
        self.io.flush_frame(self.term.fd);
        key::read_key(self.term.fd);
        self.f.insert(Flags::REDRAW);
    }

    fn stat_nl(&mut self) {
        self.io.push(vt::CR);
        self.io.push(vt::LF);
    }

    fn stat_time(&mut self, ts: i64) {
        let (y, mo, d, h, mi, s) = crate::date::decompose(self.tz, ts);
        self.io.push_u64_pad(y.max(0) as u64, b'0', 2);
        self.io.push_b(b'-');
        self.io.push_u64_pad(mo as u64, b'0', 2);
        self.io.push_b(b'-');
        self.io.push_u64_pad(d as u64, b'0', 2);
        self.io.push_b(b' ');
        self.io.push_u64_pad(h as u64, b'0', 2);
        self.io.push_b(b':');
        self.io.push_u64_pad(mi as u64, b'0', 2);
        self.io.push_b(b':');
        self.io.push_u64_pad(s as u64, b'0', 2);
    }
}
