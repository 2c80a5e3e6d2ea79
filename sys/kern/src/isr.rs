// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt dispatch for the serial driver.
//!
//! The vector table (supplied by the device crate in the image) routes the
//! four U(S)ART interrupt lines to the handlers below, which funnel into a
//! single dispatcher registered by the driver. The driver learns *which*
//! peripheral fired from the argument rather than from four separate entry
//! points, mirroring how it keeps per-peripheral state in one table.

use abi::UartId;
use core::sync::atomic::{AtomicUsize, Ordering};

/// The registered dispatcher, stored as a raw function address (zero when
/// unregistered) so it fits in an atomic.
static UART_DISPATCHER: AtomicUsize = AtomicUsize::new(0);

/// Registers `handler` as the common U(S)ART interrupt dispatcher.
/// Registration is idempotent; the last registration wins.
pub fn set_uart_isr(handler: fn(UartId)) {
    UART_DISPATCHER.store(handler as usize, Ordering::Relaxed);
}

// Only the real vector table below calls this; simulation has no
// interrupts.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
fn dispatch_uart(id: UartId) {
    let raw = UART_DISPATCHER.load(Ordering::Relaxed);
    if raw != 0 {
        // Safety: the only writer is set_uart_isr, which stores a real
        // fn(UartId) address.
        let handler: fn(UartId) = unsafe { core::mem::transmute(raw) };
        handler(id);
    }
    // A spurious interrupt with no dispatcher registered has nothing to
    // acknowledge it; the NVIC line is only unmasked by the driver, which
    // registers first, so this stays quiet in practice.
}

// Interrupt entry points, named to match the device vector table.
#[cfg(target_arch = "arm")]
mod vectors {
    use super::*;

    #[allow(non_snake_case)]
    #[no_mangle]
    extern "C" fn LPUART1() {
        dispatch_uart(UartId::Lpuart1);
    }

    #[allow(non_snake_case)]
    #[no_mangle]
    extern "C" fn USART1() {
        dispatch_uart(UartId::Usart1);
    }

    #[allow(non_snake_case)]
    #[no_mangle]
    extern "C" fn USART2() {
        dispatch_uart(UartId::Usart2);
    }

    #[allow(non_snake_case)]
    #[no_mangle]
    extern "C" fn USART3() {
        dispatch_uart(UartId::Usart3);
    }
}
