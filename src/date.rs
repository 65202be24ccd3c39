// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Civil date decomposition for the stat overlay.
//!
//! Fixed-point rendition of the fast unix-epoch-to-date
//! algorithm; exact for every timestamp the filesystem can
//! produce.

const C1: u64 = 505054698555331; // floor(2^64 * 4 / 146097)
const C2: u64 = 50504432782230121; // ceil(2^64 * 4 / 1461)
const C3: u64 = 8619973866219416; // floor(2^64 / 2140)

const SCALE: u32 = 32;
const SHIFT0: u32 = 30556 * SCALE;
const SHIFT1: u32 = 5980 * SCALE;

const ERAS: u64 = 4726498270;
const D_SHIFT: u64 = 146097 * ERAS - 719469;
const Y_SHIFT: u64 = 400 * ERAS - 1;

fn mulhi(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) >> 64) as u64
}

fn mul128(a: u64, b: u64) -> (u64, u64) {
    let p = a as u128 * b as u128;
    ((p >> 64) as u64, p as u64)
}

/// Days since the unix epoch to (year, month, day).
pub(crate) fn days_to_date(day: i64) -> (i32, u32, u32) {
    let rev = D_SHIFT.wrapping_sub(day as u64);
    let cen = mulhi(C1, rev);
    let jul = rev - cen / 4 + cen;
    let (num_hi, num_lo) = mul128(C2, jul);
    let yrs = (Y_SHIFT.wrapping_sub(num_hi)) as u32;
    let ypt = mulhi((24451 * SCALE) as u64, num_lo) as u32;
    let bump = (ypt < 3952 * SCALE) as u32;
    let shift = if bump != 0 { SHIFT1 } else { SHIFT0 };
    let n = (yrs % 4) * (16 * SCALE) + shift - ypt;
    let m = n / (2048 * SCALE);
    let d = mulhi(C3, (n % (2048 * SCALE)) as u64) as u32;
    ((yrs + bump) as i32, m, d + 1)
}

/// Seconds since the unix epoch, adjusted by the timezone
/// offset, to (year, month, day, hour, minute, second).
pub(crate) fn decompose(tz: i64, ts: i64) -> (i32, u32, u32, u32, u32, u32)
{
    let us = tz + ts;
    let mut days = us.div_euclid(86400);
    let mut r = us.rem_euclid(86400);
    if r < 0 {
        r += 86400;
        days -= 1;
    }
    let (y, mo, d) = days_to_date(days);
    let h = (r / 3600) as u32;
    r -= (h as i64) * 3600;
    let mi = (r / 60) as u32;
    let s = (r - (mi as i64) * 60) as u32;
    (y, mo, d, h, mi, s)
}

/// Offset of the local timezone from UTC in seconds, captured
/// once at startup.
pub(crate) fn tz_offset() -> i64 {
    unsafe {
        let now = libc::time(core::ptr::null_mut());
        let mut lt: libc::tm = core::mem::zeroed();
        let mut gt: libc::tm = core::mem::zeroed();
        if libc::localtime_r(&now, &mut lt).is_null() {
            return 0;
        }
        if libc::gmtime_r(&now, &mut gt).is_null() {
            return 0;
        }
        let lo = libc::mktime(&mut lt);
        let gm = libc::mktime(&mut gt);
        if lo == -1 || gm == -1 {
            return 0;
        }
        (lo - gm) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch() {
        assert_eq!(days_to_date(0), (1970, 1, 1));
    }

    #[test]
    fn known_dates() {
        // 2000-02-29 (leap day) is day 11016.
        assert_eq!(days_to_date(11016), (2000, 2, 29));
        // 2026-08-01 is day 20666.
        assert_eq!(days_to_date(20666), (2026, 8, 1));
        // Day before the epoch.
        assert_eq!(days_to_date(-1), (1969, 12, 31));
    }

    #[test]
    fn clock() {
        let (y, mo, d, h, mi, s) = decompose(0, 86399);
        assert_eq!((y, mo, d), (1970, 1, 1));
        assert_eq!((h, mi, s), (23, 59, 59));
        let (y, mo, d, h, _, _) = decompose(-3600, 86399);
        assert_eq!((y, mo, d, h), (1970, 1, 1, 22));
    }
}
