// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry ordering.  Seven comparators selected by a one-byte
//! sort mode, driven by an introsort over the virtual records:
//! median-of-three quicksort, recursing on the smaller side,
//! bailing to insertion sort on short runs or at depth 32.

use crate::dir::Dir;
use crate::ent::VEnt;

pub(crate) type SortFn = fn(&Dir, u32, u32) -> i32;

/// Maps a sort-mode byte to its comparator.
pub(crate) fn sort_fn(s: u8) -> Option<SortFn> {
    match s {
        b'n' => Some(cmp_name),
        b'N' => Some(cmp_name_rev),
        b'e' => Some(cmp_fext),
        b's' => Some(cmp_size),
        b'S' => Some(cmp_size_rev),
        b'd' => Some(cmp_date),
        b'D' => Some(cmp_date_rev),
        _ => None,
    }
}

fn ord(lt: bool) -> i32 {
    if lt { -1 } else { 1 }
}

/// Natural name order: directories first, then digit-leading
/// names, then byte order with embedded digit runs compared
/// numerically.  Runs that compare equal break the tie by
/// sorting the longer leading-zero run first.
fn cmp_name(d: &Dir, a: u32, b: u32) -> i32 {
    let va = VEnt(a);
    let vb = VEnt(b);
    let ma = d.pent_at(va.off());
    let mb = d.pent_at(vb.off());

    let r = mb.kind().is_dir() as i32 - ma.kind().is_dir() as i32;
    if r != 0 {
        return r;
    }

    let fa = va.first();
    let fb = vb.first();
    let da = fa.is_ascii_digit();
    let db = fb.is_ascii_digit();
    if da != db {
        return ord(da);
    }
    if fa != fb && !(da && db) {
        return ord(fa < fb);
    }

    let pa = d.name_at(va.off());
    let pb = d.name_at(vb.off());
    let mut i = 0;
    let mut j = 0;
    while i < pa.len() && j < pb.len() {
        let ca = pa[i];
        let cb = pb[j];
        if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let mut ia = i;
            let mut ja = j;
            while ia < pa.len() && pa[ia] == b'0' {
                ia += 1;
            }
            while ja < pb.len() && pb[ja] == b'0' {
                ja += 1;
            }
            let mut ea = ia;
            let mut eb = ja;
            while ea < pa.len() && pa[ea].is_ascii_digit() {
                ea += 1;
            }
            while eb < pb.len() && pb[eb].is_ascii_digit() {
                eb += 1;
            }
            let na = ea - ia;
            let nb = eb - ja;
            if na != nb {
                return ord(na < nb);
            }
            match pa[ia..ea].cmp(&pb[ja..eb]) {
                core::cmp::Ordering::Less => return -1,
                core::cmp::Ordering::Greater => return 1,
                core::cmp::Ordering::Equal => {}
            }
            let za = ia - i;
            let zb = ja - j;
            if za != zb {
                return ord(za > zb);
            }
            i = ea;
            j = eb;
            continue;
        }
        if ca != cb {
            return ord(ca < cb);
        }
        i += 1;
        j += 1;
    }
    (i < pa.len()) as i32 - (j < pb.len()) as i32
}

fn cmp_name_rev(d: &Dir, a: u32, b: u32) -> i32 {
    -cmp_name(d, a, b)
}

/// Extension order: the substring after the final dot, byte
/// order; names with no extension sort after any extension.
fn cmp_fext(d: &Dir, a: u32, b: u32) -> i32 {
    let pa = d.name_at(VEnt(a).off());
    let pb = d.name_at(VEnt(b).off());
    let ea = pa.iter().rposition(|&c| c == b'.').map(|p| p + 1);
    let eb = pb.iter().rposition(|&c| c == b'.').map(|p| p + 1);
    match (ea, eb) {
        (None, Some(_)) => 1,
        (Some(_), None) => -1,
        (None, None) => 0,
        (Some(ea), Some(eb)) => {
            let xa = &pa[ea..];
            let xb = &pb[eb..];
            match xa.cmp(xb) {
                core::cmp::Ordering::Less => -1,
                core::cmp::Ordering::Greater => 1,
                core::cmp::Ordering::Equal => 0,
            }
        }
    }
}

fn cmp_size(d: &Dir, a: u32, b: u32) -> i32 {
    let ma = d.pent_at(VEnt(a).off());
    let mb = d.pent_at(VEnt(b).off());
    let sa = crate::ent::ent_bytes(ma);
    let sb = crate::ent::ent_bytes(mb);
    (sa > sb) as i32 - (sa < sb) as i32
}

fn cmp_size_rev(d: &Dir, a: u32, b: u32) -> i32 {
    cmp_size(d, b, a)
}

fn cmp_date(d: &Dir, a: u32, b: u32) -> i32 {
    let ta = d.pent_at(VEnt(a).off()).age();
    let tb = d.pent_at(VEnt(b).off()).age();
    ta as i32 - tb as i32
}

fn cmp_date_rev(d: &Dir, a: u32, b: u32) -> i32 {
    cmp_date(d, b, a)
}

fn isort(d: &mut Dir, f: SortFn, lo: usize, hi: usize) {
    for i in (lo + 1)..hi {
        let x = d.dv[i];
        let mut j = i;
        while j > lo && f(d, d.dv[j - 1], x) > 0 {
            d.dv[j] = d.dv[j - 1];
            j -= 1;
        }
        d.dv[j] = x;
    }
}

fn qsort(d: &mut Dir, f: SortFn, mut lo: usize, mut hi: usize, mut dep: u32) {
    while hi - lo > 16 {
        if dep == 0 {
            break;
        }
        dep -= 1;
        let mid = lo + ((hi - lo) >> 1);

        let a = d.dv[lo];
        let b = d.dv[mid];
        let c = d.dv[hi - 1];
        let pivot = if f(d, a, b) < 0 {
            if f(d, b, c) < 0 {
                b
            } else if f(d, a, c) < 0 {
                c
            } else {
                a
            }
        } else if f(d, a, c) < 0 {
            a
        } else if f(d, b, c) < 0 {
            c
        } else {
            b
        };

        let mut i = lo;
        let mut j = hi - 1;
        loop {
            loop {
                let x = d.dv[i];
                if f(d, x, pivot) < 0 {
                    i += 1;
                } else {
                    break;
                }
            }
            loop {
                let x = d.dv[j];
                if f(d, pivot, x) < 0 {
                    j -= 1;
                } else {
                    break;
                }
            }
            if i >= j {
                break;
            }
            d.dv.swap(i, j);
            i += 1;
            j -= 1;
        }

        if j - lo < hi - (j + 1) {
            qsort(d, f, lo, j + 1, dep);
            lo = j + 1;
        } else {
            qsort(d, f, j + 1, hi, dep);
            hi = j + 1;
        }
    }
    isort(d, f, lo, hi);
}

impl Dir {
    /// Reorders the virtual records and rewrites each physical
    /// LOC so the index-by-name stays valid.
    pub(crate) fn sort(&mut self, f: SortFn) {
        let dl = self.dl;
        if dl > 1 {
            qsort(self, f, 0, dl, 32);
        }
        self.rebuild_loc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::tests::push_ent;
    use crate::ent::Kind;

    fn load(names: &[(&[u8], Kind)]) -> Dir {
        let mut d = Dir::new();
        for &(n, k) in names {
            assert!(push_ent(&mut d, n, k));
        }
        d
    }

    fn order(d: &Dir) -> Vec<Vec<u8>> {
        (0..d.dl).map(|i| d.name(i).to_vec()).collect()
    }

    #[test]
    fn natural_vectors() {
        let d = load(&[
            (b"file2", Kind::Reg),
            (b"file10", Kind::Reg),
            (b"file02", Kind::Reg),
        ]);
        let c = |a: usize, b: usize| cmp_name(&d, d.dv[a], d.dv[b]);
        assert!(c(0, 1) < 0); // file2 < file10
        assert!(c(2, 1) < 0); // file02 < file10
        assert!(c(2, 0) < 0); // file02 < file2 (more zeros first)
        assert!(c(1, 0) > 0);
        assert_eq!(c(0, 0), 0);
    }

    #[test]
    fn dirs_first_then_digits() {
        let mut d = load(&[
            (b"zeta", Kind::Reg),
            (b"10-notes", Kind::Reg),
            (b"b", Kind::Dir),
            (b"2-notes", Kind::Reg),
            (b"alpha", Kind::Reg),
        ]);
        d.sort(cmp_name);
        let got = order(&d);
        let want: Vec<Vec<u8>> = [
            b"b".as_slice(),
            b"2-notes",
            b"10-notes",
            b"alpha",
            b"zeta",
        ]
        .iter()
        .map(|s| s.to_vec())
        .collect();
        assert_eq!(got, want);
        // LOC was rewritten to match the new order.
        for i in 0..d.dl {
            assert_eq!(d.pent(i).loc() as usize, i);
        }
    }

    #[test]
    fn extension_order() {
        let d = load(&[
            (b"a.rs", Kind::Reg),
            (b"b.c", Kind::Reg),
            (b"noext", Kind::Reg),
        ]);
        let c = |a: usize, b: usize| cmp_fext(&d, d.dv[a], d.dv[b]);
        assert!(c(1, 0) < 0); // .c < .rs
        assert!(c(2, 0) > 0); // no extension after any
        assert!(c(0, 2) < 0);
    }

    #[test]
    fn sorted_is_monotone() {
        let mut d = load(&[
            (b"q9", Kind::Reg),
            (b"q10", Kind::Reg),
            (b"a", Kind::Dir),
            (b"q1", Kind::Reg),
            (b"zz", Kind::Reg),
            (b"q09", Kind::Reg),
            (b".dot", Kind::Reg),
        ]);
        d.sort(cmp_name);
        for i in 0..d.dl - 1 {
            assert!(
                cmp_name(&d, d.dv[i], d.dv[i + 1]) <= 0,
                "order violated at {i}"
            );
        }
    }

    #[test]
    fn insertion_path_matches_quick_path() {
        // 40 entries forces the quicksort partition at least
        // once; compare against a simple stable sort.
        let mut d = Dir::new();
        for i in 0..40u32 {
            let name = format!("f{}", (i * 7919) % 100);
            if !d.exists(name.as_bytes()) {
                assert!(push_ent(&mut d, name.as_bytes(), Kind::Reg));
            }
        }
        let mut want = order(&d);
        d.sort(cmp_name);
        want.sort_by(|a, b| {
            // Numeric compare of the digit suffix.
            let ka: u32 =
                std::str::from_utf8(&a[1..]).unwrap().parse().unwrap();
            let kb: u32 =
                std::str::from_utf8(&b[1..]).unwrap().parse().unwrap();
            ka.cmp(&kb)
        });
        assert_eq!(order(&d), want);
    }
}
