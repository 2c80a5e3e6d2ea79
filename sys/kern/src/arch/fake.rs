// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-in for the machine.
//!
//! This models just enough of the architecture surface for the scheduler's
//! state logic to run under the host test harness: the active-task pointer,
//! a "context switch requested" latch that tests pump by hand, and a
//! synchronous rendition of the start exception. There is no actual
//! register state and nothing ever runs on a fabricated stack.
//!
//! Tests are expected to serialize themselves (the statics here are process
//! globals) and to call `reset` before touching the scheduler.

use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crate::task::Tcb;

static ACTIVE_TASK_PTR: AtomicPtr<Tcb> = AtomicPtr::new(null_mut());

static CONTEXT_SWITCH_PENDED: AtomicBool = AtomicBool::new(false);

static TICKS: [AtomicU32; 2] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU32 = AtomicU32::new(0);
    [ZERO; 2]
};

pub fn active_task_ptr() -> *mut Tcb {
    ACTIVE_TASK_PTR.load(Ordering::Relaxed)
}

pub unsafe fn set_active_task(task: *mut Tcb) {
    ACTIVE_TASK_PTR.store(task, Ordering::Relaxed);
}

pub fn clear_active_task() {
    ACTIVE_TASK_PTR.store(null_mut(), Ordering::Relaxed);
}

/// On the host there are no interrupts to mask; exclusion is the test
/// harness's problem.
pub fn critical_section<R>(body: impl FnOnce() -> R) -> R {
    body()
}

/// Writes the same bootstrap frame the real architecture would, so frame
/// placement is exercised, but nothing will ever execute from it. Function
/// addresses are truncated to the 32-bit frame words on 64-bit hosts.
pub unsafe fn initialize_task_stack(
    stack_top: *mut u32,
    entry: fn(usize),
    arg: usize,
) -> *mut u32 {
    crate::arch::frame::write_bootstrap_frame(
        stack_top,
        entry as usize as u32,
        crate::task::task_exit_trampoline as usize as u32,
        arg as u32,
    )
}

/// Latches a context-switch request for the test harness to observe and
/// pump.
pub fn pend_context_switch() {
    CONTEXT_SWITCH_PENDED.store(true, Ordering::Relaxed);
}

/// Consumes a pended context-switch request, if one is latched.
pub fn take_pended_switch() -> bool {
    CONTEXT_SWITCH_PENDED.swap(false, Ordering::Relaxed)
}

/// The hardware start exception selects a task synchronously; so does the
/// fake, by calling straight into the selector.
pub fn trigger_start_exception() {
    crate::task::select_active_task();
}

pub fn start_scheduler() {
    trigger_start_exception();
}

pub fn enable_irq(_n: u32, _also_clear_pending: bool) {}

pub fn disable_irq(_n: u32, _also_clear_pending: bool) {}

pub fn ticks() -> u64 {
    let lo = TICKS[0].load(Ordering::Relaxed);
    let hi = TICKS[1].load(Ordering::Relaxed);
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Returns the fake to its power-on state between tests.
pub fn reset() {
    clear_active_task();
    CONTEXT_SWITCH_PENDED.store(false, Ordering::Relaxed);
    TICKS[0].store(0, Ordering::Relaxed);
    TICKS[1].store(0, Ordering::Relaxed);
}
