// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command builder: turns a whitespace-separated template
//! into argv vectors and runs them under one of five modes.
//!
//! Template tokens: `%d` is the cwd, `$NAME` an environment
//! lookup (empty aborts), `%f` the cursor entry, `%m` the mark
//! set.  A trailing lone `&` backgrounds the command, a leading
//! `<` feeds the selected path to stdin, and a leading `!`
//! hands the whole line to `$SHELL -c` with the marks (or the
//! cursor entry) as positional arguments.
//!
//! Modes: single (one operand), each (one spawn per persisted
//! mark, absolute paths), virtual (one spawn per marked index
//! inline), bulk (all persisted marks in one argv, run in the
//! mark directory), chunk (materialise as many marks as fit,
//! run, clear, repeat).

use crate::dir::{MARK_CMD_POST, MARK_CMD_PRE, NONE};
use crate::fm::{cstring, get_env, CmdFlags, Flags, Fm};
use crate::key;
use crate::result::{errno, Error, Result};
use std::ffi::CString;

/// Whitespace-split tokens of a template body.
fn tokens(s: &[u8]) -> impl Iterator<Item = &[u8]> {
    s.split(|&b| b == b' ' || b == 0).filter(|t| !t.is_empty())
}

/// Everything the mode selector needs to know about a parsed
/// template.
pub(crate) struct Parsed {
    /// Token index of the substitution point.
    pub ti: Option<usize>,
    /// Which token sits there: `m`, `f`, or 0.
    pub tt: u8,
    /// Token count, excluding a trailing `&`.
    pub tc: usize,
    /// Template with the `<` prefix stripped.
    pub body: Vec<u8>,
}

impl Fm {
    /// Scans the template once: finds the substitution point,
    /// folds the `&` and `<` markers into the command flags.
    pub(crate) fn cmd_parse(&mut self, s: &[u8]) -> Parsed {
        let mut tc = 0;
        let mut ti = None;
        let mut tt = 0u8;
        let mut last: &[u8] = b"";
        let mut li = 0;
        for (i, t) in tokens(s).enumerate() {
            tc += 1;
            last = t;
            li = i;
            if ti.is_none()
                && t.len() == 2
                && t[0] == b'%'
                && (t[1] == b'm' || t[1] == b'f')
            {
                ti = Some(i);
                tt = t[1];
            }
        }
        if tc > 0 && last == b"&" {
            self.cf.insert(CmdFlags::BG);
            tc -= 1;
            if let Some(t) = ti {
                if li < t {
                    ti = Some(t - 1);
                }
            }
        }
        let mut body = s.to_vec();
        if body.first() == Some(&b'<') {
            body.remove(0);
            self.cf.insert(CmdFlags::STDIN);
        }
        Parsed { ti, tt, tc, body }
    }

    /// Substitutes one token list into an argv, with `mk` at
    /// the substitution point.
    fn cmd_argv(
        &self,
        body: &[u8],
        ti: Option<usize>,
        tc: usize,
        mk: &[u8],
    ) -> Result<Vec<CString>> {
        let mut argv = Vec::with_capacity(tc + 1);
        for (j, t) in tokens(body).take(tc).enumerate() {
            if Some(j) == ti {
                argv.push(cstring(mk));
            } else if t == b"%d" {
                argv.push(cstring(&self.pwd));
            } else if t.len() > 1 && t[0] == b'$' {
                let name = String::from_utf8_lossy(&t[1..]).into_owned();
                let v = get_env(&name, b"");
                if v.is_empty() {
                    return Err(Error::EnvUnset);
                }
                argv.push(cstring(&v));
            } else {
                argv.push(cstring(t));
            }
        }
        Ok(argv)
    }

    /// One spawn with a single operand.
    fn cmd_build(
        &mut self,
        body: &[u8],
        ti: Option<usize>,
        tc: usize,
        mk: &[u8],
        tf: bool,
    ) -> Result<()> {
        let argv = self.cmd_argv(body, ti, tc, mk)?;
        let refs: Vec<&core::ffi::CStr> =
            argv.iter().map(|a| a.as_c_str()).collect();
        let mut fd = None;
        if self.cf.contains(CmdFlags::STDIN) {
            let c = cstring(mk);
            let r = unsafe {
                libc::open(c.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC)
            };
            if r < 0 {
                return Err(Error::Exec(errno()));
            }
            fd = Some(r);
        }
        let wd = cstring(&self.pwd);
        let bg = self.cf.contains(CmdFlags::BG);
        let ok = self.exec(fd, Some(wd.as_c_str()), &refs, bg, tf);
        if let Some(fd) = fd {
            unsafe { libc::close(fd) };
        }
        if ok { Ok(()) } else { Err(Error::ExecNonZero) }
    }

    /// Each mode: one spawn per persisted mark with its
    /// absolute path; falls back to the cursor entry when no
    /// marks exist.
    fn cmd_build_each(
        &mut self,
        body: &[u8],
        ti: Option<usize>,
        tc: usize,
    ) -> Result<()> {
        if self.dir.vml == 0 && self.dir.ml == 0 {
            if self.c == NONE {
                return Ok(());
            }
            let mk = self.dir.name(self.c).to_vec();
            return self.cmd_build(body, ti, tc, &mk, true);
        }
        let bg = self.cf.contains(CmdFlags::BG);
        if !bg {
            let _ = self.term_cooked_mode();
        }
        let r = loop {
            if self.dir.ml == 0 {
                break Ok(());
            }
            let mut fp = self.mpwd.clone();
            fp.push(b'/');
            fp.extend_from_slice(self.dir.mark_at(0));
            if let Err(e) = self.cmd_build(body, ti, tc, &fp, false) {
                break Err(e);
            }
            self.dir.mark_pop_first();
        };
        if !bg {
            let _ = self.term_raw_mode();
        }
        r
    }

    /// Virtual mode: one spawn per marked visible index, names
    /// taken straight from the arena.
    fn cmd_build_each_virtual(
        &mut self,
        body: &[u8],
        ti: Option<usize>,
        tc: usize,
    ) -> Result<()> {
        if self.dir.vml == 0 {
            if self.c == NONE {
                return Ok(());
            }
            let mk = self.dir.name(self.c).to_vec();
            return self.cmd_build(body, ti, tc, &mk, true);
        }
        let bg = self.cf.contains(CmdFlags::BG);
        if !bg {
            let _ = self.term_cooked_mode();
        }
        let mut r = Ok(());
        'outer: for b in 0..crate::bitset::words(self.dir.dl) {
            let mut w = self.dir.vm[b] & self.dir.v[b];
            while w != 0 {
                let i = (b << 6) + w.trailing_zeros() as usize;
                w &= w - 1;
                if i >= self.dir.dl {
                    break;
                }
                let mk = self.dir.name(i).to_vec();
                if let Err(e) = self.cmd_build(body, ti, tc, &mk, false) {
                    r = Err(e);
                    break 'outer;
                }
                self.dir.mark_clear_idx(i);
                if self.dir.vml == 0 {
                    break 'outer;
                }
            }
        }
        if !bg {
            let _ = self.term_raw_mode();
        }
        r
    }

    /// One argv holding every persisted mark, run in the mark
    /// directory.
    fn cmd_build_bulk_exec(
        &mut self,
        body: &[u8],
        ti: usize,
        tc: usize,
    ) -> Result<()> {
        let mut argv: Vec<CString> = Vec::new();
        for (j, t) in tokens(body).take(tc).enumerate() {
            if j == ti {
                if self.dir.ml != 0 {
                    for i in 0..self.dir.ml {
                        argv.push(cstring(self.dir.mark_at(i)));
                    }
                } else if self.c != NONE {
                    argv.push(cstring(self.dir.name(self.c)));
                }
            } else if t == b"%d" {
                argv.push(cstring(&self.pwd));
            } else if t.len() > 1 && t[0] == b'$' {
                let name = String::from_utf8_lossy(&t[1..]).into_owned();
                let v = get_env(&name, b"");
                if v.is_empty() {
                    return Err(Error::EnvUnset);
                }
                argv.push(cstring(&v));
            } else {
                argv.push(cstring(t));
            }
        }
        let refs: Vec<&core::ffi::CStr> =
            argv.iter().map(|a| a.as_c_str()).collect();
        let wd = cstring(&self.mpwd);
        let bg = self.cf.contains(CmdFlags::BG);
        if self.exec(None, Some(wd.as_c_str()), &refs, bg, !bg) {
            Ok(())
        } else {
            Err(Error::ExecNonZero)
        }
    }

    fn cmd_build_bulk(
        &mut self,
        body: &[u8],
        ti: usize,
        tc: usize,
    ) -> Result<()> {
        if !self.mark_materialize() {
            return Err(Error::MarkOom);
        }
        self.cmd_build_bulk_exec(body, ti, tc)?;
        self.dir.mark_clear_all();
        Ok(())
    }

    /// Chunked bulk: materialise as many marks as fit, run on
    /// that chunk, clear it, repeat until the mark set drains.
    fn cmd_build_bulk_chunk(
        &mut self,
        body: &[u8],
        ti: usize,
        tc: usize,
    ) -> Result<()> {
        let mut b = 0;
        while b < self.dir.dl && self.dir.vml > 0 {
            self.dir.mark_invalidate();
            let pb = b;
            let n = self.dir.mark_materialize_range(&mut b);
            if n == 0 {
                break;
            }
            self.cmd_build_bulk_exec(body, ti, tc)?;
            self.dir.mark_clear_range(pb, b);
        }
        if self.dir.vml == 0 {
            self.dir.mark_clear_all();
        }
        Ok(())
    }

    /// `!` commands: the remainder goes to `$SHELL -c` with the
    /// cursor entry, or the whole mark set, as arguments.
    fn cmd_sh(&mut self, c: &[u8]) -> Result<()> {
        if c.is_empty() {
            return Ok(());
        }
        let file = (self.dir.ml == 0 && self.c != NONE)
            .then(|| self.dir.name(self.c).to_vec());
        let sh = get_env("SHELL", b"/bin/sh");
        let mut argv: Vec<CString> = vec![
            cstring(&sh),
            cstring(b"-c"),
            cstring(c),
            cstring(b"dfm"),
        ];
        match &file {
            Some(f) => argv.push(cstring(f)),
            None => {
                for i in 0..self.dir.ml {
                    argv.push(cstring(self.dir.mark_at(i)));
                }
            }
        }
        let refs: Vec<&core::ffi::CStr> =
            argv.iter().map(|a| a.as_c_str()).collect();
        let wd =
            if file.is_some() { &self.pwd } else { &self.mpwd }.clone();
        let wdc = cstring(&wd);
        let ok = self.exec(None, Some(wdc.as_c_str()), &refs, false, true);
        if file.is_none() {
            self.dir.mark_clear_all();
        }
        if ok {
            Ok(())
        } else {
            self.f.insert(Flags::ERROR);
            Err(Error::ExecNonZero)
        }
    }

    fn cmd_run_sh(&mut self, s: &[u8]) -> Result<()> {
        if !self.mark_materialize() {
            return Err(Error::MarkOom);
        }
        let e = (s.first() == Some(&b'!')) as usize;
        self.cmd_sh(&s[e..].to_vec())
    }

    /// Asks about one existing destination name.  EOF aborts.
    fn prompt_conflict(&mut self, d: &[u8]) -> u8 {
        self.draw_nav_begin_err();
        self.io.push(b"conflict: '");
        self.io.push_sanitized(d);
        self.io.push(b"': try overwrite?");
        self.io.push(b" [a]bort [y]es [Y]es all [n]o [N]o all");
        self.draw_nav_end();
        self.io.flush_frame(self.term.fd);
        loop {
            let Some(k) = key::read_key(self.term.fd) else {
                return b'a';
            };
            match k.b[0] {
                c @ (b'a' | b'y' | b'Y' | b'n' | b'N') => return c,
                _ => {}
            }
        }
    }

    /// Walks the operand set before a conflict-flagged command:
    /// each name already present in the destination prompts.
    /// `Y`/`N` replay without asking again.  Returns the C-style
    /// verdict: -1 abort, -2 last operand dropped, else the
    /// last response.
    fn prepare_marks_conflict(&mut self) -> i32 {
        let mut om: i32 = 0;
        if self.dir.ml == 0 {
            if self.c == NONE {
                return 0;
            }
            let m = self.dir.name(self.c).to_vec();
            if !self.dir.exists(&m) {
                return 0;
            }
            om = self.prompt_conflict(&m) as i32;
            return match om as u8 {
                b'a' | b'N' => -1,
                b'n' => -2,
                _ => om,
            };
        }
        let mut i = 0;
        while i < self.dir.ml {
            let m = self.dir.mark_at(i).to_vec();
            if !self.dir.exists(&m) {
                i += 1;
                continue;
            }
            if om != b'Y' as i32 && om != b'N' as i32 {
                om = self.prompt_conflict(&m) as i32;
            }
            match om as u8 {
                b'a' => return -1,
                b'N' => {
                    self.dir.ml = 0;
                    return -1;
                }
                b'n' => {
                    self.dir.mark_drop_idx(i);
                    om = -2;
                }
                _ => i += 1,
            }
        }
        om
    }

    /// Parses and runs a submitted command line.  Returns true
    /// when the prompt buffer should be cleared.
    pub(crate) fn cmd_run(&mut self, s: &[u8]) -> bool {
        if s.is_empty() {
            return true;
        }
        if self.cf.contains(CmdFlags::MARK_DIR)
            && !self.f.contains(Flags::MARK_PWD)
            && self.dir.vml > 0
        {
            self.draw_err(Error::NotMarkDir);
            return false;
        }
        if self.cf.contains(CmdFlags::NOT_MARK_DIR)
            && self.f.contains(Flags::MARK_PWD)
        {
            self.draw_err(Error::InMarkDir);
            return false;
        }
        if s[0] == b'!' {
            let r = self.cmd_run_sh(s);
            return self.cmd_finish(r);
        }
        let p = self.cmd_parse(s);
        if p.tt != 0 && self.dir.vml == 0 && self.dir.vl == 0 {
            self.draw_err(Error::NothingToDo);
            return false;
        }

        #[derive(PartialEq)]
        enum Mode {
            Single,
            Each,
            Virtual,
            Bulk,
            Chunk,
        }
        let mark_pwd = self.f.contains(Flags::MARK_PWD);
        let m = if self
            .cf
            .intersects(CmdFlags::STDIN | CmdFlags::FILE_CURSOR)
        {
            Mode::Single
        } else if p.tt == b'm' {
            if self.dir.vml > 0 {
                if mark_pwd { Mode::Chunk } else { Mode::Bulk }
            } else {
                Mode::Each
            }
        } else if p.tt == b'f' {
            if mark_pwd { Mode::Virtual } else { Mode::Each }
        } else {
            Mode::Single
        };

        match m {
            Mode::Single | Mode::Each | Mode::Virtual => {
                if p.tc > MARK_CMD_PRE {
                    self.draw_err(Error::ArgvTooLarge);
                    return false;
                }
            }
            Mode::Bulk | Mode::Chunk => {
                let ti = p.ti.unwrap_or(0);
                if ti > MARK_CMD_PRE || p.tc - ti - 1 > MARK_CMD_POST {
                    self.draw_err(Error::ArgvTooLarge);
                    return false;
                }
            }
        }

        if matches!(m, Mode::Each | Mode::Bulk)
            && self.cf.contains(CmdFlags::CONFLICT)
        {
            let r = self.prepare_marks_conflict();
            if r < 0 {
                self.f.insert(Flags::REDRAW_NAV);
            }
            if r == -1 {
                return true;
            }
            if r == -2 && self.dir.ml == 0 {
                return true;
            }
        }

        let r = match m {
            Mode::Single => {
                let mk = if self.c != NONE {
                    self.dir.name(self.c).to_vec()
                } else {
                    Vec::new()
                };
                self.cmd_build(&p.body, p.ti, p.tc, &mk, true)
            }
            Mode::Each => self.cmd_build_each(&p.body, p.ti, p.tc),
            Mode::Virtual => {
                self.cmd_build_each_virtual(&p.body, p.ti, p.tc)
            }
            Mode::Bulk => {
                self.cmd_build_bulk(&p.body, p.ti.unwrap_or(0), p.tc)
            }
            Mode::Chunk => {
                self.cmd_build_bulk_chunk(&p.body, p.ti.unwrap_or(0), p.tc)
            }
        };
        self.cmd_finish(r)
    }

    /// Common post-run handling: schedule a refresh for
    /// mutating commands and surface the failure class.
    fn cmd_finish(&mut self, r: Result<()>) -> bool {
        if r.is_ok() && self.cf.contains(CmdFlags::MUT) {
            if self.watch.fd().is_some() {
                self.f.insert(Flags::DIRTY | Flags::DIRTY_WITHIN);
            } else {
                self.dir_refresh();
            }
        }
        match r {
            Ok(()) => true,
            Err(Error::EnvUnset) => {
                self.draw_err(Error::EnvUnset);
                self.f.insert(Flags::ERROR);
                false
            }
            Err(Error::MarkOom) => {
                self.draw_err(Error::MarkOom);
                self.f.insert(Flags::ERROR);
                false
            }
            Err(_) => {
                // Spawn failures already landed in the status
                // area from the executor.
                self.f.insert(Flags::ERROR);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer() {
        let t: Vec<&[u8]> = tokens(b"cp  -R %m  %d").collect();
        assert_eq!(t, [b"cp".as_slice(), b"-R", b"%m", b"%d"]);
        assert_eq!(tokens(b"   ").count(), 0);
    }

    fn parse(fm: &mut Fm, s: &[u8]) -> Parsed {
        fm.cf = CmdFlags::empty();
        fm.cmd_parse(s)
    }

    #[test]
    fn parse_finds_substitution_point() {
        let mut fm = match Fm::new() {
            Ok(fm) => fm,
            // No tty under the test harness; parsing does not
            // need one.
            Err(_) => return,
        };
        let p = parse(&mut fm, b"mv %m %d");
        assert_eq!(p.ti, Some(1));
        assert_eq!(p.tt, b'm');
        assert_eq!(p.tc, 3);

        let p = parse(&mut fm, b"tar xf %f &");
        assert_eq!(p.ti, Some(2));
        assert_eq!(p.tt, b'f');
        assert_eq!(p.tc, 3);
        assert!(fm.cf.contains(CmdFlags::BG));

        let p = parse(&mut fm, b"<wc -l");
        assert_eq!(p.ti, None);
        assert_eq!(p.tc, 2);
        assert!(fm.cf.contains(CmdFlags::STDIN));
        assert_eq!(p.body, b"wc -l");
    }
}
