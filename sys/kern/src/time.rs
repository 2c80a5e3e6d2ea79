// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel timekeeping.
//!
//! The system tick maintains a monotonic tick counter; this module is the
//! portable view of it. One tick is `1 / abi::config::SYSTICK_HZ` seconds.

use crate::arch;

/// In-kernel timestamp, measured in ticks since scheduler start.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn ticks(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(ticks: u64) -> Self {
        Self(ticks)
    }
}

/// Reads the current kernel timestamp.
pub fn now() -> Timestamp {
    Timestamp(arch::ticks())
}
