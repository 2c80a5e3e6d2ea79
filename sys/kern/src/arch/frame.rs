// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bootstrap frame layout for new task stacks.
//!
//! A freshly created task has never been suspended, but the context-switch
//! handlers only know how to *resume* tasks. So task creation fabricates the
//! register image a suspension would have left behind: the hardware exception
//! frame the core pops on exception return, preceded by the software-saved
//! block the restore sequence (`ldmia {r4-r11, lr}`) expects.
//!
//! This module is plain Rust on purpose: the word placement is the contract
//! between task creation and the assembly in `arm_m`, and keeping it free of
//! target dependencies lets the layout be checked on the host.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Initially we just set the Thumb Mode bit, the minimum required.
pub const INITIAL_XPSR: u32 = 1 << 24;

/// EXC_RETURN value seeded into the software-saved block: return to Thread
/// mode, resume on the process stack, no FP state.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// The register image laid down at the top of a new task's stack, in
/// ascending address order.
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct BootstrapFrame {
    // Software-saved block, restored by `ldmia {r4-r11, lr}`.
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub exc_return: u32,
    // Hardware frame, popped by the core on exception return.
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Writes a bootstrap frame just below `stack_top` and returns the resulting
/// stack pointer, i.e. the address of the frame. The entry function receives
/// `arg` in r0; if it returns, control transfers to `exit_lr`. Registers with
/// no assigned meaning get recognizable sentinel values so a stack dump of a
/// task that never ran reads clearly.
///
/// Any ragged bytes at the top are discarded to satisfy the AAPCS 8-byte
/// stack alignment.
///
/// # Safety
///
/// `stack_top` must be one past the end of a writable region with at least
/// `size_of::<BootstrapFrame>() + 8` bytes below it.
pub unsafe fn write_bootstrap_frame(
    stack_top: *mut u32,
    entry: u32,
    exit_lr: u32,
    arg: u32,
) -> *mut u32 {
    let top = (stack_top as usize) & !0x7;
    let frame = (top - core::mem::size_of::<BootstrapFrame>())
        as *mut BootstrapFrame;
    frame.write(BootstrapFrame {
        r4: 0x0404_0404,
        r5: 0x0505_0505,
        r6: 0x0606_0606,
        r7: 0x0707_0707,
        r8: 0x0808_0808,
        r9: 0x0909_0909,
        r10: 0x1010_1010,
        r11: 0x1111_1111,
        exc_return: EXC_RETURN_THREAD_PSP,
        r0: arg,
        r1: 0x0101_0101,
        r2: 0x0202_0202,
        r3: 0x0303_0303,
        r12: 0x1212_1212,
        lr: exit_lr,
        pc: entry,
        xpsr: INITIAL_XPSR,
    });
    frame as *mut u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: u32 = 0x0800_1235;
    const EXIT: u32 = 0x0800_4321;
    const ARG: u32 = 0xA5A5_0001;

    fn build(buffer: &mut [u32; 32]) -> (usize, *mut u32) {
        let top = buffer.as_mut_ptr().wrapping_add(32);
        let sp = unsafe { write_bootstrap_frame(top, ENTRY, EXIT, ARG) };
        let offset =
            (sp as usize - buffer.as_ptr() as usize) / core::mem::size_of::<u32>();
        (offset, sp)
    }

    #[test]
    fn restore_lands_at_entry_with_argument() {
        let mut buffer = [0u32; 32];
        let (base, _) = build(&mut buffer);

        // The software block sits at the stack pointer, the hardware frame
        // right above it; a restore therefore pops EXC_RETURN into lr, and
        // the exception return pops pc = entry, r0 = argument, lr = exit
        // trampoline.
        assert_eq!(buffer[base + 8], EXC_RETURN_THREAD_PSP);
        assert_eq!(buffer[base + 9], ARG); // r0
        assert_eq!(buffer[base + 14], EXIT); // lr
        assert_eq!(buffer[base + 15], ENTRY); // pc
        assert_eq!(buffer[base + 16], INITIAL_XPSR);
    }

    #[test]
    fn unassigned_registers_carry_sentinels() {
        let mut buffer = [0u32; 32];
        let (base, _) = build(&mut buffer);

        assert_eq!(buffer[base], 0x0404_0404); // r4, lowest address
        assert_eq!(buffer[base + 7], 0x1111_1111); // r11
        assert_eq!(buffer[base + 10], 0x0101_0101); // r1
        assert_eq!(buffer[base + 13], 0x1212_1212); // r12
    }

    #[test]
    fn ragged_stack_top_is_discarded() {
        let mut buffer = [0u32; 32];
        let top = buffer.as_mut_ptr().wrapping_add(32);
        // Push the top out of alignment by five bytes.
        let ragged = (top as usize - 5) as *mut u32;
        let sp = unsafe { write_bootstrap_frame(ragged, ENTRY, EXIT, ARG) };
        // The ragged end is discarded down to an 8-byte boundary, and the
        // frame sits immediately below that boundary, inside the buffer.
        let frame_end =
            sp as usize + core::mem::size_of::<BootstrapFrame>();
        assert_eq!(frame_end, (ragged as usize) & !0x7);
        assert!(sp as usize >= buffer.as_ptr() as usize);
        assert!(frame_end <= top as usize);
    }
}
