// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Leveled system logging.
//!
//! The sink is chosen at compile time by feature: `log-lpuart1` routes
//! records through a function registered at runtime (the syscall facade
//! registers the LPUART1 logger once it is open), `log-semihost` batches
//! into a static buffer and flushes whole lines through the debugger,
//! `log-swo` streams bytes out ITM stimulus port 0, and with no sink
//! feature every record is discarded before formatting.
//!
//! Records are formatted with `core::fmt` directly into the sink; there is
//! no heap involvement, so logging is legal before the scheduler starts.
//! Logging from interrupt handlers is legal only for the semihost and SWO
//! sinks; the UART sink can block the caller and must stay in task context.

#![no_std]

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Log severity, in ascending order of importance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn letter(self) -> &'static str {
        match self {
            Level::Debug => "D",
            Level::Info => "I",
            Level::Warn => "W",
            Level::Error => "E",
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "level-error")] {
        pub const MIN_LEVEL: Level = Level::Error;
    } else if #[cfg(feature = "level-warn")] {
        pub const MIN_LEVEL: Level = Level::Warn;
    } else if #[cfg(feature = "level-info")] {
        pub const MIN_LEVEL: Level = Level::Info;
    } else {
        pub const MIN_LEVEL: Level = Level::Debug;
    }
}

/// Checks whether records at `level` survive the compile-time filter.
pub fn enabled(level: Level) -> bool {
    level >= MIN_LEVEL
}

/// The registered byte sink for the `log-lpuart1` configuration. Stored as a
/// raw function address because function pointers don't fit in an atomic
/// directly; zero means "not registered yet."
static SINK: AtomicUsize = AtomicUsize::new(0);

/// Registers the function that carries log bytes to the serial port. Records
/// emitted before registration are dropped.
pub fn set_sink(sink: fn(&[u8])) {
    SINK.store(sink as usize, Ordering::Relaxed);
}

/// Formats and emits one record. Prefer the level macros over calling this
/// directly.
pub fn log(level: Level, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let mut out = SinkWriter;
    // Formatting errors here would mean the sink refused bytes; there is
    // nowhere better to report that, so they are swallowed.
    let _ = write!(out, "[{}] ", level.letter());
    let _ = out.write_fmt(args);
    let _ = out.write_str("\n");
}

struct SinkWriter;

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        emit(s.as_bytes());
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "log-lpuart1")] {
        fn emit(bytes: &[u8]) {
            let raw = SINK.load(Ordering::Relaxed);
            if raw != 0 {
                // Safety: the only writer of SINK is set_sink, which stores
                // a real fn(&[u8]) address.
                let sink: fn(&[u8]) = unsafe { core::mem::transmute(raw) };
                sink(bytes);
            }
        }
    } else if #[cfg(all(feature = "log-semihost", target_arch = "arm"))] {
        fn emit(bytes: &[u8]) {
            semihost::emit(bytes)
        }

        mod semihost {
            use abi::config::LOG_BUF_SIZE;
            use core::cell::UnsafeCell;

            /// Semihost operations trap into the debugger, which is slow
            /// enough to dominate everything else on the wire. Bytes are
            /// batched here and flushed a line at a time.
            struct Buffer {
                bytes: UnsafeCell<[u8; LOG_BUF_SIZE]>,
                used: UnsafeCell<usize>,
            }

            // Safety: all access happens inside interrupt::free.
            unsafe impl Sync for Buffer {}

            static BUF: Buffer = Buffer {
                bytes: UnsafeCell::new([0; LOG_BUF_SIZE]),
                used: UnsafeCell::new(0),
            };

            pub fn emit(bytes: &[u8]) {
                cortex_m::interrupt::free(|_| {
                    // Safety: we hold the only access path and interrupts
                    // are masked.
                    let buf = unsafe { &mut *BUF.bytes.get() };
                    let used = unsafe { &mut *BUF.used.get() };
                    for &byte in bytes {
                        buf[*used] = byte;
                        *used += 1;
                        if *used == buf.len() || byte == b'\n' {
                            flush(&buf[..*used]);
                            *used = 0;
                        }
                    }
                });
            }

            fn flush(bytes: &[u8]) {
                if let Ok(mut out) = cortex_m_semihosting::hio::hstdout() {
                    let _ = out.write_all(bytes);
                }
            }
        }
    } else if #[cfg(all(feature = "log-swo", target_arch = "arm"))] {
        fn emit(bytes: &[u8]) {
            // Safety: the stimulus port register supports concurrent
            // one-word writes; interleaving with another context garbles
            // output but breaks nothing.
            let itm = unsafe {
                &mut *(cortex_m::peripheral::ITM::PTR
                    as *mut cortex_m::peripheral::itm::RegisterBlock)
            };
            cortex_m::itm::write_all(&mut itm.stim[0], bytes);
        }
    } else {
        fn emit(_bytes: &[u8]) {}
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Debug, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Info, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Warn, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Error, core::format_args!($($arg)*))
    };
}
