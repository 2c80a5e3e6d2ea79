// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo image for the Nucleo-L433RC: brings the core to 80 MHz, opens
//! LPUART1 (the ST-Link virtual COM port) as the system logger, and runs
//! two chatty tasks that take turns, exit, and get reaped by the idle task.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use abi::{Priority, SysError, UartId};
use cortex_m_rt::entry;
use drv_stm32l4_usart::UartPinmux;
use kern::task::{self, TaskConfig};
use stm32l4::stm32l4x3 as device;

/// Core clock after `configure_clocks`; the kernel derives its tick from
/// this.
const HCLK_HZ: u32 = 80_000_000;

#[no_mangle]
extern "C" fn hclk_freq() -> u32 {
    HCLK_HZ
}

#[entry]
fn main() -> ! {
    configure_clocks();

    if newlib::init_logger(&NucleoPins).is_err() {
        // No logger, no way to complain; park.
        loop {
            core::hint::spin_loop();
        }
    }
    klog::info!("perch demo starting, hclk {} Hz", HCLK_HZ);

    spawn_chatter("ping", ping_entry);
    spawn_chatter("pong", pong_entry);

    task::start()
}

fn spawn_chatter(name: &'static str, entry: fn(usize)) {
    let config = TaskConfig {
        name: Some(name),
        priority: Priority(5),
        ..TaskConfig::default()
    };
    // The argument word carries the round count.
    if task::create(entry, 3, config).is_err() {
        panic!("could not create task '{}'", name);
    }
}

// Each task logs a few rounds, yielding in between, then returns -- which
// lands in the kernel's exit path and hands the carcass to the idle task.

fn ping_entry(rounds: usize) {
    for round in 0..rounds {
        klog::info!("ping {}", round);
        task::yield_now();
    }
}

fn pong_entry(rounds: usize) {
    for round in 0..rounds {
        klog::info!("pong {}", round);
        task::yield_now();
    }
}

/// MSI (4 MHz) times 40 over 2 through the main PLL: 80 MHz, the clock the
/// UART divisor table is written against.
fn configure_clocks() {
    let flash = unsafe { &*device::FLASH::ptr() };
    let rcc = unsafe { &*device::RCC::ptr() };

    // Four flash wait states before raising the clock, per the datasheet
    // table for VCORE range 1.
    flash.acr.modify(|r, w| unsafe { w.bits((r.bits() & !0x7) | 4) });

    // PLLCFGR: PLLSRC = MSI, PLLM = /1, PLLN = x40, PLLR = /2, PLLREN.
    rcc.pllcfgr
        .write(|w| unsafe { w.bits((40 << 8) | (1 << 24) | 0b01) });
    // PLLON, wait for PLLRDY.
    rcc.cr.modify(|r, w| unsafe { w.bits(r.bits() | (1 << 24)) });
    while rcc.cr.read().bits() & (1 << 25) == 0 {}
    // Switch SYSCLK to the PLL and wait for the switch to report.
    rcc.cfgr
        .modify(|r, w| unsafe { w.bits((r.bits() & !0b11) | 0b11) });
    while rcc.cfgr.read().bits() & (0b11 << 2) != (0b11 << 2) {}
}

struct NucleoPins;

impl UartPinmux for NucleoPins {
    /// Routes LPUART1 to PA2 (TX) / PA3 (RX), alternate function 8 -- the
    /// pins wired to the ST-Link virtual COM port on this board.
    fn configure(&self, id: UartId) -> Result<(), SysError> {
        if id != UartId::Lpuart1 {
            return Err(SysError::NoSupport);
        }
        let rcc = unsafe { &*device::RCC::ptr() };
        let gpioa = unsafe { &*device::GPIOA::ptr() };

        // GPIOAEN.
        rcc.ahb2enr.modify(|r, w| unsafe { w.bits(r.bits() | 1) });
        // PA2/PA3 to alternate function mode...
        gpioa.moder.modify(|r, w| unsafe {
            w.bits((r.bits() & !(0b11 << 4 | 0b11 << 6)) | (0b10 << 4) | (0b10 << 6))
        });
        // ...very high speed, pulled up...
        gpioa.ospeedr.modify(|r, w| unsafe {
            w.bits(r.bits() | (0b11 << 4) | (0b11 << 6))
        });
        gpioa.pupdr.modify(|r, w| unsafe {
            w.bits((r.bits() & !(0b11 << 4 | 0b11 << 6)) | (0b01 << 4) | (0b01 << 6))
        });
        // ...alternate function 8.
        gpioa.afrl.modify(|r, w| unsafe {
            w.bits((r.bits() & !(0xF << 8 | 0xF << 12)) | (8 << 8) | (8 << 12))
        });
        Ok(())
    }
}

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    klog::error!("kernel panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
