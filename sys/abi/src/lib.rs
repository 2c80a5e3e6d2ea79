// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the kernel, the drivers, and the syscall facade.
//!
//! This crate is the bottom of the dependency graph, so everything here must
//! be expressible without touching hardware: plain data, no behavior beyond
//! trivial conversions.

#![no_std]

use bitflags::bitflags;

/// System-wide error taxonomy. Driver and kernel entry points return these
/// through `Result`; the POSIX facade flattens them into errno values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SysError {
    /// An argument was outside the accepted domain.
    BadParam,
    /// The resource is exclusively held by someone else.
    InUse,
    /// The hardware cannot provide the requested mode.
    Unsupported,
    /// An allocation failed.
    NoMem,
    /// The scheduler is in a state it should never reach.
    Scheduler,
    /// The operation is not implemented on this peripheral or build.
    NoSupport,
}

impl SysError {
    /// Maps an error to the errno value the POSIX facade reports for it.
    pub fn errno(self) -> i32 {
        match self {
            SysError::BadParam => errno::EINVAL,
            SysError::InUse => errno::EAGAIN,
            SysError::Unsupported => errno::EINVAL,
            SysError::NoMem => errno::ENOMEM,
            SysError::Scheduler => errno::EINVAL,
            SysError::NoSupport => errno::EINVAL,
        }
    }
}

/// The errno values the syscall stubs hand back to newlib. Only the ones we
/// actually report are defined here; the numbers match newlib's
/// `sys/errno.h`.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const ECHILD: i32 = 10;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
}

/// Why a blocked task is blocked. Wakers must present the matching reason or
/// their wake is ignored, which keeps a stale interrupt from resuming a task
/// that has since blocked on something else.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockReason {
    /// Waiting for space in a UART transmit ring.
    UartTxFull,
    /// Waiting for data in a UART receive ring.
    UartRxEmpty,
}

/// Scheduling state of a task. A task is in the scheduler queue its state
/// names, except `Active`, which is in no queue at all.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Ran to completion or was destroyed; awaiting reaping by the idle task.
    Exited,
    /// Suspended until a matching `unblock`.
    Blocked(BlockReason),
    /// Runnable, queued at its priority level.
    Ready,
    /// Currently executing on the process stack.
    Active,
}

/// Task priority. Higher numbers are more important, unlike exception
/// priorities on the machine itself. Valid values are
/// `0..config::PRIORITY_COUNT`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    pub fn is_valid(self) -> bool {
        usize::from(self.0) < config::PRIORITY_COUNT
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

bitflags! {
    /// Per-task housekeeping flags.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TaskFlags: u32 {
        /// The stack was allocated from the kernel heap and must be freed
        /// when the task is reaped; cleared for caller-supplied stacks.
        const STACK_OWNED = 1 << 0;
    }
}

/// Identifies one of the serial peripherals the driver manages. Doubles as
/// the index into the driver's port table and as the argument the common
/// interrupt dispatcher receives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UartId {
    Lpuart1,
    Usart1,
    Usart2,
    Usart3,
}

impl UartId {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            UartId::Lpuart1 => 0,
            UartId::Usart1 => 1,
            UartId::Usart2 => 2,
            UartId::Usart3 => 3,
        }
    }
}

/// Compile-time sizing and defaults. Numbers live here; either/or choices
/// (preemption, log sink, exit style) are cargo features on the crates that
/// implement them.
pub mod config {
    use super::Priority;

    /// Kernel heap size in bytes. Zero disables allocation entirely, which
    /// in turn disables task creation with a kernel-owned stack.
    pub const HEAP_SIZE: usize = 16 * 1024;

    /// Number of priority levels. Level 0 is the bottom, where the idle
    /// task lives; it is schedulable like any other level.
    pub const PRIORITY_COUNT: usize = 8;

    /// Priority for tasks created without an explicit one.
    pub const DEFAULT_PRIORITY: Priority = Priority(4);

    /// Stack size for tasks created without an explicit one.
    pub const DEFAULT_STACK_SIZE: usize = 1024;

    pub const IDLE_PRIORITY: Priority = Priority(0);
    pub const IDLE_STACK_SIZE: usize = 512;

    /// System tick rate in hertz. 200 Hz gives the ~5 ms tick the
    /// preemption latency bound is stated against.
    pub const SYSTICK_HZ: u32 = 200;

    /// Capacity of each UART transmit/receive ring, in bytes.
    pub const UART_RING_SIZE: usize = 80;

    /// Batching buffer size for the semihosting log sink. Semihost writes
    /// trap into the debugger, so they are flushed a line at a time.
    pub const LOG_BUF_SIZE: usize = 512;
}
