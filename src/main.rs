// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! dfm: an interactive file manager for raw-mode terminals.
//!
//! The process model is one thread and one big state machine
//! (`fm::Fm`).  The directory lives in a packed arena (`dir`,
//! `ent`), name lookup and truncation memoisation share one
//! table (`lookup`), marks are a bitset plus a persisted name
//! list (`marks`), and all mutation of the filesystem goes
//! through external commands built by `cmd` and spawned by
//! `exec`.  Platform watch backends live under `watch`.

use clap::Parser;

mod bitset;
mod cmd;
mod date;
mod dir;
mod draw;
mod ent;
mod exec;
mod filter;
mod fm;
mod key;
mod lookup;
mod marks;
mod out;
mod readline;
mod result;
mod sort;
mod term;
mod utf8;
mod vt;
mod watch;

/// Interactive terminal file manager.
#[derive(Parser)]
#[command(
    name = "dfm",
    version,
    about = "directory file manager",
    after_help = "\
keys:
  enter/l  open        h/backspace  up-dir     j/k   move
  /  ?     search      :  !         command    space mark
  P V D x  cp/mv/trash/rm           q Q        quit (Q prints pwd)

environment:
  DFM_OPENER         program used to open files (overridden by -o)
  DFM_BOOKMARK_[0-9] bookmark directories
  DFM_COPYER         program used to copy the cwd string
  DFM_TRASH          program used to trash files
  DFM_TRASH_DIR      path to the trash directory"
)]
struct Args {
    /// Show hidden files at startup (+H on the command line is
    /// accepted as an alias).
    #[arg(long = "show-hidden")]
    show_hidden: bool,

    /// Hide hidden files at startup.
    #[arg(short = 'H', overrides_with = "show_hidden")]
    hide_hidden: bool,

    /// Picker mode: print the chosen path to stdout on exit.
    #[arg(short = 'p')]
    picker: bool,

    /// Program used to open files.
    #[arg(short = 'o', value_name = "opener")]
    opener: Option<String>,

    /// Default sort: one of n N e s S d D.
    #[arg(short = 's', value_name = "mode")]
    sort: Option<char>,

    /// Default view: one of n s p t a.
    #[arg(short = 'v', value_name = "mode")]
    view: Option<char>,

    /// Directory to open.
    #[arg(default_value = ".")]
    path: String,
}

fn main() {
    // `+H` predates the parser's vocabulary; rewrite it.
    let argv = std::env::args().map(|a| {
        if a == "+H" { "--show-hidden".to_string() } else { a }
    });
    let args = Args::parse_from(argv);

    let mut fm = match fm::Fm::new() {
        Ok(fm) => fm,
        Err(e) => {
            eprintln!("error: {}", e.as_str());
            std::process::exit(1);
        }
    };

    if args.show_hidden {
        fm.f.insert(fm::Flags::HIDDEN);
    }
    if args.hide_hidden {
        fm.f.remove(fm::Flags::HIDDEN);
    }
    if args.picker {
        fm.f.insert(fm::Flags::PICKER);
    }
    if let Some(o) = &args.opener {
        fm.opener = o.as_bytes().to_vec();
    }
    if let Some(s) = args.sort {
        let s = s as u32 as u8;
        fm.ds = if sort::sort_fn(s).is_some() { s } else { b'n' };
    }
    if let Some(v) = args.view {
        fm.dv = v as u32 as u8;
    }

    if !fm.path_chdir(args.path.as_bytes()) {
        eprintln!("cd: '{}': {}", args.path, last_os_error());
        std::process::exit(1);
    }

    if let Err(e) = fm.run() {
        eprintln!("term: {}", last_os_error_for(e.errno()));
        std::process::exit(1);
    }

    if !fm.pwd.is_empty() {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(&fm.pwd);
        let _ = out.write_all(b"\n");
    }
}

fn last_os_error() -> String {
    last_os_error_for(result::errno())
}

fn last_os_error_for(e: i32) -> String {
    if e == 0 {
        return "failed".to_string();
    }
    unsafe {
        core::ffi::CStr::from_ptr(libc::strerror(e))
            .to_string_lossy()
            .into_owned()
    }
}
