// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! POSIX system-call facade for newlib.
//!
//! Provides the `_`-prefixed operating system subroutines newlib expects at
//! link time, so C code (printf and friends) can share the image with the
//! kernel. The only "device" is the serial logger or the semihosting
//! console, selected by feature; everything process- and file-shaped is a
//! stub that reports the documented trivial failure.
//!
//! This crate also owns bringing up LPUART1 as the system logger:
//! [`init_logger`] routes the pins, opens the port in text mode, and hands
//! `klog` its sink. Call it from board init, before the scheduler starts.

#![no_std]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use abi::config::HEAP_SIZE;
use abi::{errno as errno_values, SysError, UartId};
use drv_stm32l4_usart::{Baud, Config, UartPinmux, Usart, WordLen};

/// errno as newlib sees it. Real newlib builds carry their own definition;
/// this one keeps a pure-Rust image linkable.
#[no_mangle]
pub static mut errno: i32 = 0;

fn set_errno(value: i32) {
    // Safety: a plain word store; the worst concurrent outcome is a stale
    // errno, same as C.
    unsafe {
        core::ptr::addr_of_mut!(errno).write(value);
    }
}

/// Minimal environment: one NULL entry.
static mut EMPTY_ENV: [*mut u8; 1] = [core::ptr::null_mut()];

#[no_mangle]
pub static mut environ: *mut *mut u8 =
    unsafe { core::ptr::addr_of_mut!(EMPTY_ENV) as *mut *mut u8 };

struct Logger(UnsafeCell<Option<Usart>>);

// Safety: accessed only under the kernel critical section.
unsafe impl Sync for Logger {}

static LOGGER: Logger = Logger(UnsafeCell::new(None));

fn logger() -> Option<Usart> {
    kern::arch::critical_section(|| {
        // Safety: interrupts masked; init_logger is the only writer.
        unsafe { *LOGGER.0.get() }
    })
}

/// Opens LPUART1 at 115 200 8N1 (text mode) as the system log device and
/// registers it as the `klog` sink. The pin-mux implementation must know
/// how to route LPUART1.
pub fn init_logger(pins: &dyn UartPinmux) -> Result<(), SysError> {
    let config = Config {
        baud: Baud::B115200,
        word_len: WordLen::Bits8,
        text_mode: true,
        ..Config::default()
    };
    let uart = Usart::open(UartId::Lpuart1, &config, pins)?;
    kern::arch::critical_section(|| {
        // Safety: interrupts masked.
        unsafe {
            *LOGGER.0.get() = Some(uart);
        }
    });
    klog::set_sink(logger_sink);
    Ok(())
}

/// Closes the log device and unhooks nothing else; mostly useful to hand
/// the peripheral to someone else.
pub fn close_logger() {
    let uart = kern::arch::critical_section(|| {
        // Safety: interrupts masked.
        unsafe { (*LOGGER.0.get()).take() }
    });
    if let Some(uart) = uart {
        uart.close();
    }
}

fn logger_sink(bytes: &[u8]) {
    // The handle is copied out so the write -- which may block -- runs
    // outside the critical section.
    if let Some(uart) = logger() {
        let _ = uart.write(bytes);
    }
}

/// Writes to a system device: the serial logger, the semihosting console,
/// or nowhere, per the compile-time log sink.
#[no_mangle]
pub extern "C" fn _write(_file: i32, buf: *const u8, len: i32) -> i32 {
    if buf.is_null() || len < 0 {
        set_errno(errno_values::EINVAL);
        return -1;
    }
    // Safety: the caller vouches for [buf, buf+len), same as every C write.
    let bytes = unsafe { core::slice::from_raw_parts(buf, len as usize) };

    cfg_match_write(bytes)
}

#[cfg(feature = "log-lpuart1")]
fn cfg_match_write(bytes: &[u8]) -> i32 {
    match logger() {
        Some(uart) => match uart.write(bytes) {
            Ok(n) => n as i32,
            Err(e) => {
                set_errno(e.errno());
                -1
            }
        },
        None => {
            set_errno(errno_values::EINVAL);
            -1
        }
    }
}

#[cfg(all(
    feature = "log-semihost",
    not(feature = "log-lpuart1"),
    target_arch = "arm"
))]
fn cfg_match_write(bytes: &[u8]) -> i32 {
    for byte in bytes {
        // One WRITEC operation per byte; slow, but the debugger end of
        // semihosting only speaks characters.
        unsafe {
            cortex_m_semihosting::syscall(
                cortex_m_semihosting::nr::WRITEC,
                byte,
            );
        }
    }
    bytes.len() as i32
}

#[cfg(not(any(
    feature = "log-lpuart1",
    all(feature = "log-semihost", target_arch = "arm")
)))]
fn cfg_match_write(_bytes: &[u8]) -> i32 {
    // No defined way to write to a system device.
    -1
}

/// Program break for newlib's allocator. Zero until the first call, then
/// the moving break address.
static CURRENT_BREAK: AtomicUsize = AtomicUsize::new(0);

extern "C" {
    // Linker-provided: end of BSS, where the C heap begins.
    static mut __ebss: u8;
    // Linker-provided: lowest address of the main stack region.
    static _stack_base: u8;
}

/// Moves the program break. The break starts at the end of BSS and may not
/// climb into the main stack region; with the heap configured away it
/// always fails.
#[no_mangle]
pub extern "C" fn _sbrk(incr: isize) -> *mut u8 {
    if HEAP_SIZE == 0 {
        set_errno(errno_values::ENOMEM);
        return usize::MAX as *mut u8;
    }
    kern::arch::critical_section(|| {
        let start = unsafe { core::ptr::addr_of!(__ebss) as usize };
        let ceiling = unsafe { core::ptr::addr_of!(_stack_base) as usize };
        let old = match CURRENT_BREAK.load(Ordering::Relaxed) {
            0 => start,
            brk => brk,
        };
        let new = old.wrapping_add_signed(incr);
        if new > ceiling || new < start {
            set_errno(errno_values::ENOMEM);
            return usize::MAX as *mut u8;
        }
        CURRENT_BREAK.store(new, Ordering::Relaxed);
        old as *mut u8
    })
}

/// Exits the system. Minimal builds park the processor; `exit-full` builds
/// report the code through the log sink first.
#[no_mangle]
pub extern "C" fn _exit(code: i32) -> ! {
    if cfg!(feature = "exit-full") {
        klog::error!("system exited with code {}", code);
    }
    loop {
        core::hint::spin_loop();
    }
}

/* All handlers defined below are "stubs" simply provided to link correctly. */

/// Minimal prefix of newlib's `struct stat`; only `st_mode` is ever
/// written.
#[repr(C)]
pub struct Stat {
    pub st_dev: i16,
    pub st_ino: u16,
    pub st_mode: u32,
}

const S_IFCHR: u32 = 0x2000;

#[no_mangle]
pub extern "C" fn _read(_file: i32, _ptr: *mut u8, _len: i32) -> i32 {
    0
}

#[no_mangle]
pub extern "C" fn _close(_file: i32) -> i32 {
    -1
}

#[no_mangle]
pub extern "C" fn _execve(
    _name: *const u8,
    _argv: *const *const u8,
    _env: *const *const u8,
) -> i32 {
    set_errno(errno_values::ENOMEM);
    -1
}

#[no_mangle]
pub extern "C" fn _fork() -> i32 {
    set_errno(errno_values::EAGAIN);
    -1
}

#[no_mangle]
pub extern "C" fn _fstat(_file: i32, st: *mut Stat) -> i32 {
    if !st.is_null() {
        // Safety: caller-supplied stat buffer; we touch the prefix only.
        unsafe {
            (*st).st_mode = S_IFCHR;
        }
    }
    0
}

#[no_mangle]
pub extern "C" fn _stat(_path: *const u8, st: *mut Stat) -> i32 {
    if !st.is_null() {
        // Safety: as _fstat.
        unsafe {
            (*st).st_mode = S_IFCHR;
        }
    }
    0
}

#[no_mangle]
pub extern "C" fn _getpid() -> i32 {
    1
}

/// Every device we have is a terminal.
#[no_mangle]
pub extern "C" fn _isatty(_file: i32) -> i32 {
    1
}

#[no_mangle]
pub extern "C" fn _kill(_pid: i32, _sig: i32) -> i32 {
    set_errno(errno_values::EINVAL);
    -1
}

#[no_mangle]
pub extern "C" fn _lseek(_file: i32, _offset: i32, _whence: i32) -> i32 {
    0
}

#[no_mangle]
pub extern "C" fn _open(_name: *const u8, _flags: i32, _mode: i32) -> i32 {
    -1
}

#[no_mangle]
pub extern "C" fn _times(_buf: *mut u8) -> i32 {
    -1
}

#[no_mangle]
pub extern "C" fn _unlink(_name: *const u8) -> i32 {
    set_errno(errno_values::ENOENT);
    -1
}

#[no_mangle]
pub extern "C" fn _wait(_status: *mut i32) -> i32 {
    set_errno(errno_values::ECHILD);
    -1
}
