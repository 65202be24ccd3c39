// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Visibility.  Three filters decide which entries are in the
//! visible set; the set itself is a word-granular bitset with
//! per-word prefix popcounts so rank and select are O(n/64).
//!
//! The search query arrives as the two halves of the readline's
//! split buffer, conceptually concatenated at the front (or
//! anywhere, for the substring filter) of the name.

use crate::bitset;
use crate::dir::Dir;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Filter {
    /// Pass everything live; dotfiles only when enabled.
    Hidden,
    /// Name starts with left-half then right-half.
    StartsWith,
    /// Either segment pair found anywhere in the name.
    Substr,
}

impl Dir {
    fn v_clr_ent(&mut self, i: usize) {
        if !self.vent(i).vis() {
            return;
        }
        let e = self.vent(i).with_vis(false);
        self.set_vent(i, e);
    }

    fn v_assign_ent(&mut self, i: usize, v: bool) {
        if self.vent(i).vis() == v {
            return;
        }
        let e = self.vent(i).with_vis(v);
        self.set_vent(i, e);
    }

    /// Rebuilds the visible bitset, the prefix popcounts, and
    /// the visible count from the VIS flags.
    pub(crate) fn v_rebuild(&mut self) {
        let mut s = 0usize;
        for b in 0..bitset::words(self.dl) {
            let mut w = 0u64;
            for j in 0..64 {
                let i = (b << 6) + j;
                if i >= self.dl {
                    break;
                }
                if self.vent(i).vis() {
                    w |= 1u64 << j;
                }
            }
            self.v[b] = w;
            self.vp[b] = s as u16;
            s += w.count_ones() as usize;
        }
        self.vl = s;
    }

    pub(crate) fn filter_pass(
        &self,
        f: Filter,
        show_hidden: bool,
        i: usize,
        cl: &[u8],
        cr: &[u8],
    ) -> bool {
        let v = self.vent(i);
        if v.tomb() {
            return false;
        }
        match f {
            Filter::Hidden => show_hidden || !v.dot(),
            Filter::StartsWith => {
                let n = self.name(i);
                let w = cl.len() + cr.len();
                if w > n.len() {
                    return false;
                }
                n.starts_with(cl) && n[cl.len()..].starts_with(cr)
            }
            Filter::Substr => {
                let w = cl.len() + cr.len();
                if w == 0 {
                    return true;
                }
                let n = self.name(i);
                if w > n.len() {
                    return false;
                }
                for j in 0..=(n.len() - w) {
                    if n[j..].starts_with(cl)
                        && n[j + cl.len()..].starts_with(cr)
                    {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Full O(n) pass: recompute VIS for every live entry and
    /// rebuild the bitset.
    pub(crate) fn filter_apply(
        &mut self,
        f: Filter,
        show_hidden: bool,
        cl: &[u8],
        cr: &[u8],
    ) {
        for i in 0..self.dl {
            if self.vent(i).tomb() {
                self.v_clr_ent(i);
            } else {
                let p = self.filter_pass(f, show_hidden, i, cl, cr);
                self.v_assign_ent(i, p);
            }
        }
        self.v_rebuild();
    }

    /// Incremental pass restricted to the currently visible
    /// set.  Correct only when the new query narrows the old
    /// one (the user extended it on the right).
    pub(crate) fn filter_apply_inc(
        &mut self,
        f: Filter,
        show_hidden: bool,
        cl: &[u8],
        cr: &[u8],
    ) {
        let mut i = self.next(0);
        while let Some(k) = i {
            if self.vent(k).tomb()
                || !self.filter_pass(f, show_hidden, k, cl, cr)
            {
                self.v_clr_ent(k);
            }
            i = self.next(k + 1);
        }
        self.v_rebuild();
    }

    /// Rank of entry `idx` within the visible set.
    pub(crate) fn rank(&self, idx: usize) -> usize {
        let b = idx >> 6;
        let o = idx & 63;
        let m = if o != 0 { (1u64 << o) - 1 } else { 0 };
        self.vp[b] as usize + (self.v[b] & m).count_ones() as usize
    }

    /// Entry index of the `k`-th visible entry.
    pub(crate) fn visible_select(&self, k: usize) -> Option<usize> {
        if k >= self.vl {
            return None;
        }
        let mut lo = 0;
        let mut hi = bitset::words(self.dl);
        if hi == 0 {
            return None;
        }
        while lo + 1 < hi {
            let mi = lo + ((hi - lo) >> 1);
            if (self.vp[mi] as usize) <= k {
                lo = mi;
            } else {
                hi = mi;
            }
        }
        let mut w = self.v[lo];
        for _ in 0..(k - self.vp[lo] as usize) {
            w &= w - 1;
        }
        let t = w.trailing_zeros() as usize;
        if t == 64 {
            return None;
        }
        Some((lo << 6) + t)
    }

    /// Next visible entry at or after `i`.
    pub(crate) fn next(&self, i: usize) -> Option<usize> {
        bitset::next_set(&self.v, i, self.dl)
    }

    /// Previous visible entry at or before `i`.
    pub(crate) fn prev(&self, i: usize) -> Option<usize> {
        bitset::prev_set(&self.v, i, self.dl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::tests::push_ent;
    use crate::ent::Kind;

    fn load() -> Dir {
        let mut d = Dir::new();
        for n in
            [b"a.txt".as_slice(), b".hidden", b"foo2.log", b"foo10.log"]
        {
            assert!(push_ent(&mut d, n, Kind::Reg));
        }
        d
    }

    #[test]
    fn hidden_filter() {
        let mut d = load();
        d.filter_apply(Filter::Hidden, false, b"", b"");
        assert_eq!(d.vl, 3);
        assert!(!bitset::get(&d.v, 1));
        d.filter_apply(Filter::Hidden, true, b"", b"");
        assert_eq!(d.vl, 4);
    }

    #[test]
    fn startswith_split_query() {
        let mut d = load();
        // "fo" typed, cursor at the end: left="fo", right="".
        d.filter_apply(Filter::StartsWith, true, b"fo", b"");
        assert_eq!(d.vl, 2);
        // Cursor in the middle: left="fo", right="o1".
        d.filter_apply(Filter::StartsWith, true, b"fo", b"o1");
        assert_eq!(d.vl, 1);
        assert_eq!(d.visible_select(0), Some(3));
    }

    #[test]
    fn substr_filter() {
        let mut d = load();
        d.filter_apply(Filter::Substr, true, b"o2", b"");
        assert_eq!(d.vl, 1);
        assert_eq!(d.visible_select(0), Some(2));
        d.filter_apply(Filter::Substr, true, b"", b"");
        assert_eq!(d.vl, 4);
    }

    #[test]
    fn incremental_narrows() {
        let mut d = load();
        d.filter_apply(Filter::StartsWith, true, b"f", b"");
        assert_eq!(d.vl, 2);
        d.filter_apply_inc(Filter::StartsWith, true, b"foo1", b"");
        assert_eq!(d.vl, 1);
        assert_eq!(d.visible_select(0), Some(3));
    }

    #[test]
    fn rank_select_roundtrip() {
        let mut d = load();
        d.filter_apply(Filter::Hidden, false, b"", b"");
        let mut r = 0;
        let mut i = d.next(0);
        while let Some(k) = i {
            assert_eq!(d.rank(k), r);
            assert_eq!(d.visible_select(r), Some(k));
            r += 1;
            i = d.next(k + 1);
        }
        assert_eq!(r, d.vl);
        assert_eq!(d.visible_select(d.vl), None);
    }

    #[test]
    fn tombstones_are_invisible() {
        let mut d = load();
        let x = d.vent(0).with_tomb(true);
        d.set_vent(0, x);
        d.filter_apply(Filter::Hidden, true, b"", b"");
        assert_eq!(d.vl, 3);
        assert!(!bitset::get(&d.v, 0));
        // Invariant: v bit iff VIS and not TOMB.
        for i in 0..d.dl {
            let want = d.vent(i).vis() && !d.vent(i).tomb();
            assert_eq!(bitset::get(&d.v, i), want);
        }
    }
}
