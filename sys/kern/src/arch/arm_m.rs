// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M / ARMv8-M (mainline profile).
//!
//! # Notes on the exception split
//!
//! Three service routines cooperate to run the scheduler:
//!
//! - `SVCall` starts (and restarts) scheduling. It resets the main stack
//!   pointer from the vector table, selects an active task, enables the
//!   system tick, and restores the chosen task without saving anything --
//!   the context it was entered from is either the boot code (which never
//!   resumes) or a task that just destroyed itself (which must not resume).
//! - `PendSV` is the ordinary context switch: save the outgoing task's
//!   callee-saved registers on its process stack, record the stack top in
//!   its TCB, pick a successor, restore symmetrically.
//! - `SysTick` maintains the kernel timestamp and, when preemption is
//!   enabled, pends a `PendSV` whenever a higher-priority task is ready.
//!
//! Anything that wants to switch contexts from task or interrupt code pokes
//! the PendSV pending bit rather than switching inline; the switch then
//! happens once no other handler is active. We didn't invent this idea --
//! it's covered in most books on the Cortex-M.
//!
//! Both `SVCall` and `PendSV` are `global_asm!` bodies: they transact
//! directly on processor state and cannot tolerate a compiler-generated
//! prologue touching the stack pointers out from under them.
//!
//! # Layout contract
//!
//! The handlers dereference the active TCB pointer and treat the first word
//! as the saved process stack pointer. `task::Tcb` is `repr(C)` with
//! `stack_ptr` first to uphold this.

use core::arch::global_asm;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::task::Tcb;
use abi::config::SYSTICK_HZ;

/// On ARMvx-M we have to use a global to record the active task pointer,
/// since we don't have a scratch register. The assembly below addresses this
/// symbol by name.
#[no_mangle]
static ACTIVE_TASK_PTR: AtomicPtr<Tcb> = AtomicPtr::new(null_mut());

/// Kernel timestamp in ticks. This is a pair of `AtomicU32` because (1) we
/// want the interior mutability of the atomic types but (2) ARMv7-M doesn't
/// have any 64-bit atomic operations. It is only written from the tick
/// handler, which cannot preempt itself, so the split is fine.
///
/// `TICKS[0]` is the least significant part, `TICKS[1]` the most
/// significant.
static TICKS: [AtomicU32; 2] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU32 = AtomicU32::new(0);
    [ZERO; 2]
};

extern "C" {
    /// Current core clock in hertz; provided by the board support in the
    /// image, which is the only place that knows how the clock tree was
    /// programmed.
    fn hclk_freq() -> u32;
}

pub fn active_task_ptr() -> *mut Tcb {
    ACTIVE_TASK_PTR.load(Ordering::Relaxed)
}

/// Records `task` as the active task.
///
/// # Safety
///
/// The pointer must reference a live TCB, and must remain valid until the
/// next call to `set_active_task` or `clear_active_task`.
pub unsafe fn set_active_task(task: *mut Tcb) {
    ACTIVE_TASK_PTR.store(task, Ordering::Relaxed);
}

pub fn clear_active_task() {
    ACTIVE_TASK_PTR.store(null_mut(), Ordering::Relaxed);
}

/// Runs `body` with interrupts masked via PRIMASK. This is the mutual
/// exclusion primitive for everything the kernel shares with handler
/// context. Nesting is fine; the prior mask state is restored on exit.
pub fn critical_section<R>(body: impl FnOnce() -> R) -> R {
    cortex_m::interrupt::free(|_| body())
}

/// Lays down the bootstrap frame for a new task.
///
/// # Safety
///
/// See `frame::write_bootstrap_frame`; `stack_top` must bound a writable
/// stack region big enough for the frame.
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

/// Requests a context switch. The switch runs once no other handler is
/// active; if called with interrupts masked it is deferred until the mask
/// drops.
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Enters the start exception, which discards the calling context and
/// resumes whatever task the scheduler selects. Returns only if no task
/// could be selected at all, which the caller must treat as fatal.
pub fn trigger_start_exception() {
    unsafe {
        core::arch::asm!("svc 0");
    }
}

/// One-time scheduler entry from the boot context: demote the kernel's own
/// exceptions to the bottom of the priority range, then trap into the start
/// exception.
pub fn start_scheduler() {
    // Device interrupts keep their (higher) default priority, so a UART
    // interrupt is never stalled behind a context switch; PendSV just
    // latches until the handler stack unwinds.
    //
    // Safety: purely lowering priorities from their defaults; the register
    // API is unsafe, the operation is not.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // SHPR2: SVCall.
        scb.shpr[7].write(0xFF);
        // SHPR3: PendSV and SysTick.
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);
    }
    trigger_start_exception();
}

/// Programs and starts the system tick. Called from the start exception
/// with interrupts masked; the symbol is `extern "C"` for the assembly's
/// benefit.
///
/// The tick counts HCLK/8, so the reload is the core clock over eight times
/// the tick rate. A reload that does not fit the 24-bit field means the
/// clock configuration and tick rate are irreconcilable, which is fatal.
#[no_mangle]
extern "C" fn enable_systick() {
    let reload = unsafe { hclk_freq() } / 8 / SYSTICK_HZ;
    if reload == 0 || reload > 0x00FF_FFFF {
        panic!("systick reload {} out of range", reload);
    }
    // Safety: this, too, is safe in practice but unsafe in API.
    unsafe {
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value; the interrupt fires on the 1 -> 0
        // transition.
        syst.rvr.write(reload - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt, clock source HCLK/8.
        syst.csr.modify(|v| v | 0b011);
    }
}

/// Reads the kernel timestamp, in ticks.
pub fn ticks() -> u64 {
    // The tick handler cannot preempt kernel code at the same priority, and
    // thread-mode readers tolerate a torn read at the 32-bit rollover once
    // every ~8 months at 200 Hz; reading low before high keeps the error
    // bounded to one tick.
    let lo = TICKS[0].load(Ordering::Relaxed);
    let hi = TICKS[1].load(Ordering::Relaxed);
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Handler that gets linked into the vector table for the System Tick Timer
/// overflow interrupt. (Name is dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    // Advance the kernel's notion of time by adding 1. Laboriously.
    let t0 = TICKS[0].load(Ordering::Relaxed);
    if let Some(t0p) = t0.checked_add(1) {
        TICKS[0].store(t0p, Ordering::Relaxed);
    } else {
        let t1 = TICKS[1].load(Ordering::Relaxed);
        TICKS[0].store(0, Ordering::Relaxed);
        TICKS[1].store(t1 + 1, Ordering::Relaxed);
    }

    #[cfg(feature = "preemption")]
    if crate::task::preemption_pending() {
        pend_context_switch();
    }
}

/// Enables IRQ `n` in the NVIC, optionally clearing a stale pending bit
/// first.
pub fn enable_irq(n: u32, also_clear_pending: bool) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (n / 32) as usize;
    let bit_mask = 1 << (n % 32);
    if also_clear_pending {
        // Do this _before_ enabling.
        unsafe {
            nvic.icpr[reg_num].write(bit_mask);
        }
    }
    unsafe {
        nvic.iser[reg_num].write(bit_mask);
    }
}

/// Disables IRQ `n` in the NVIC.
pub fn disable_irq(n: u32, also_clear_pending: bool) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (n / 32) as usize;
    let bit_mask = 1 << (n % 32);
    unsafe {
        nvic.icer[reg_num].write(bit_mask);
    }
    if also_clear_pending {
        unsafe {
            nvic.icpr[reg_num].write(bit_mask);
        }
    }
}

// Handler that gets linked into the vector table for the Supervisor Call
// (SVC) instruction. (Name is dictated by the `cortex_m` crate.)
//
// Entered from two places only: the boot context in `start_scheduler`, and a
// task destroying itself. Neither context is ever resumed, so nothing is
// saved; the main stack pointer is wound back to its power-on value and the
// selected task is restored from its process stack.
global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        @ Reset the main stack pointer to its initial value, read from word
        @ zero of the active vector table.
        movw r0, #0xed08
        movt r0, #0xe000            @ r0 = &SCB->VTOR
        ldr r0, [r0]
        ldr r0, [r0]
        msr MSP, r0

        @ Pick the task to run and start the tick, serialized against
        @ device interrupts.
        cpsid i
        bl select_active_task
        bl enable_systick
        cpsie i

        @ Restore the chosen task's callee-saved state from its process
        @ stack. The first TCB word is the saved stack pointer.
        movw r0, #:lower16:ACTIVE_TASK_PTR
        movt r0, #:upper16:ACTIVE_TASK_PTR
        ldr r0, [r0]
        ldr r1, [r0]
        ldmia r1!, {{r4-r11, lr}}
        msr PSP, r1

        @ lr now holds EXC_RETURN for thread mode on the process stack; the
        @ core intercepts the branch and unstacks the hardware frame.
        bx lr
",
}

// Handler that gets linked into the vector table for PendSV: the deferred
// context switch. Runs at the lowest exception priority, so it fires only
// once every other handler has finished.
global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    PendSV:
        @ Save the outgoing task's callee-saved registers and EXC_RETURN on
        @ its process stack, then publish the new stack top through the
        @ first word of its TCB.
        mrs r0, PSP
        stmdb r0!, {{r4-r11, lr}}
        movw r1, #:lower16:ACTIVE_TASK_PTR
        movt r1, #:upper16:ACTIVE_TASK_PTR
        ldr r2, [r1]
        str r0, [r2]

        @ Choose a successor with interrupts masked; it becomes the active
        @ task.
        cpsid i
        bl select_active_task
        cpsie i

        @ Restore the incoming task symmetrically.
        movw r1, #:lower16:ACTIVE_TASK_PTR
        movt r1, #:upper16:ACTIVE_TASK_PTR
        ldr r2, [r1]
        ldr r0, [r2]
        ldmia r0!, {{r4-r11, lr}}
        msr PSP, r0

        @ resume
        bx lr
",
}
