// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem watching behind one small pump contract.
//!
//! A backend watches exactly one directory (the cwd) and hands
//! out per-name deltas: an entry appeared, departed, or had its
//! metadata touched, or the queue overflowed and the caller
//! must reload wholesale.  Pumping never blocks; backends with
//! a pollable descriptor expose it so the main wait can sleep
//! on it.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::Watch;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub(crate) use macos::Watch;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod null;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub(crate) use null::Watch;

/// What happened to one name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Delta {
    /// The backend lost track; reload the directory.
    Overflow,
    Add,
    Del,
    Modify,
}

/// One drained event.  The name is copied out of the backend's
/// buffers so the caller may mutate the directory immediately.
pub(crate) struct Event {
    pub(crate) delta: Delta,
    name: [u8; 256],
    len: usize,
}

impl Event {
    pub(crate) fn overflow() -> Event {
        Event { delta: Delta::Overflow, name: [0; 256], len: 0 }
    }

    pub(crate) fn named(delta: Delta, n: &[u8]) -> Event {
        let mut e = Event { delta, name: [0; 256], len: 0 };
        let l = n.len().min(255);
        e.name[..l].copy_from_slice(&n[..l]);
        e.len = l;
        e
    }

    pub(crate) fn name(&self) -> &[u8] {
        &self.name[..self.len]
    }
}
