// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fallback backend for platforms with no watch mechanism: the
//! pump never reports anything and the user refreshes by hand.

use super::Event;
use crate::result::Result;
use core::ffi::CStr;
use std::os::fd::RawFd;

pub(crate) struct Watch;

impl Watch {
    pub fn new() -> Result<Watch> {
        Ok(Watch)
    }

    pub fn watch(&mut self, _path: &CStr) {}

    pub fn fd(&self) -> Option<RawFd> {
        None
    }

    pub fn pump(&mut self) -> Option<Event> {
        None
    }
}
