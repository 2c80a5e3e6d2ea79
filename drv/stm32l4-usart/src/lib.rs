// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USART/LPUART driver for the STM32L4.
//!
//! Each of the four peripherals (LPUART1, USART1..3) gets a pair of fixed
//! ring buffers and is driven entirely by interrupts: `write` pushes into
//! the transmit ring and the transmit-empty interrupt drains one byte at a
//! time onto the wire; received bytes are pushed into the receive ring by
//! the receive interrupt and `read` pops them. When a ring is full (write)
//! or empty (read) the calling task blocks on the scheduler and the
//! interrupt handler wakes it as soon as the situation changes, so blocked
//! serial I/O costs no cycles.
//!
//! The peripherals are single-owner: `open` claims one exclusively until
//! `close`. Pin multiplexing belongs to the board, not this driver; `open`
//! takes a [`UartPinmux`] implementation and asks it to route the pins.
//!
//! Register access goes through the device crate for addresses and layout,
//! with explicit RM0394 bit masks for the fields -- the driver touches the
//! same handful of bits on two differently-typed register blocks (LPUART
//! and USART), and the masks are identical on both.

#![no_std]

use core::cell::UnsafeCell;

use abi::config::UART_RING_SIZE;
use abi::{BlockReason, SysError, UartId};
use bytequeue::ByteQueue;
use kern::task::TaskHandle;
use stm32l4::stm32l4x3 as device;

/// Sets mask bits in a register, read-modify-write.
macro_rules! set_bits {
    ($reg:expr, $mask:expr) => {
        $reg.modify(|r, w| unsafe { w.bits(r.bits() | $mask) })
    };
}

/// Clears mask bits in a register, read-modify-write.
macro_rules! clear_bits {
    ($reg:expr, $mask:expr) => {
        $reg.modify(|r, w| unsafe { w.bits(r.bits() & !$mask) })
    };
}

/// Runs `$body` with `$regs` bound to the register block for `$id`. LPUART1
/// and the USARTs have distinct register block types in the device crate;
/// expanding the body per arm lets one piece of source serve both.
macro_rules! with_regs {
    ($id:expr, |$regs:ident| $body:expr) => {
        match $id {
            UartId::Lpuart1 => {
                let $regs = unsafe { &*device::LPUART1::ptr() };
                $body
            }
            UartId::Usart1 => {
                let $regs = unsafe { &*device::USART1::ptr() };
                $body
            }
            UartId::Usart2 => {
                let $regs = unsafe { &*device::USART2::ptr() };
                $body
            }
            UartId::Usart3 => {
                let $regs = unsafe { &*device::USART3::ptr() };
                $body
            }
        }
    };
}

/// U(S)ART register fields, per RM0394. The same masks apply to LPUART1 and
/// the USARTs for every field the driver uses.
mod regbits {
    pub const CR1_UE: u32 = 1 << 0;
    pub const CR1_RE: u32 = 1 << 2;
    pub const CR1_TE: u32 = 1 << 3;
    pub const CR1_RXNEIE: u32 = 1 << 5;
    pub const CR1_TXEIE: u32 = 1 << 7;
    pub const CR1_PS: u32 = 1 << 9;
    pub const CR1_PCE: u32 = 1 << 10;
    pub const CR1_M0: u32 = 1 << 12;
    pub const CR1_M1: u32 = 1 << 28;

    pub const CR2_STOP_MASK: u32 = 0b11 << 12;
    pub const CR2_STOP_TWO: u32 = 0b10 << 12;
    pub const CR2_SWAP: u32 = 1 << 15;
    pub const CR2_MSBFIRST: u32 = 1 << 19;
    pub const CR2_ABREN: u32 = 1 << 20;

    pub const CR3_RTSE: u32 = 1 << 8;
    pub const CR3_CTSE: u32 = 1 << 9;

    pub const ISR_ORE: u32 = 1 << 3;
    pub const ISR_RXNE: u32 = 1 << 5;
    pub const ISR_TXE: u32 = 1 << 7;

    pub const ICR_ORECF: u32 = 1 << 3;
}

use regbits::*;

/// Wire baud rate. `Auto` requests hardware auto-baud detection, which only
/// the full USARTs implement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Baud {
    B1200,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    Auto,
}

impl Baud {
    /// BRR divisor for the USARTs, from the reference manual's table for an
    /// 80 MHz peripheral clock. Auto-baud seeds the register with the
    /// 115 200 divisor before detection takes over.
    fn usart_divisor(self) -> u32 {
        match self {
            Baud::B1200 => 0x1_046B,
            Baud::B2400 => 0x8236,
            Baud::B4800 => 0x411B,
            Baud::B9600 => 0x208E,
            Baud::B19200 => 0x1047,
            Baud::B38400 => 0x824,
            Baud::B57600 => 0x56D,
            Baud::B115200 | Baud::Auto => 0x2B6,
        }
    }

    /// BRR divisor for LPUART1 at 80 MHz, where the formula carries a 256x
    /// factor. The divisor range caps how low the peripheral can go without
    /// switching its kernel clock, so the slow rates have no entry.
    fn lpuart_divisor(self) -> Option<u32> {
        match self {
            Baud::B38400 => Some(0x8_2355),
            Baud::B57600 => Some(0x5_6CE3),
            Baud::B115200 => Some(0x2_B671),
            _ => None,
        }
    }
}

/// Data bits per frame, not counting parity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WordLen {
    Bits7,
    Bits8,
    Bits9,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BitOrder {
    LsbFirst,
    MsbFirst,
}

/// Peripheral configuration. `Default` is 115 200 8N1, LSB first, no flow
/// control, pins as routed.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub baud: Baud,
    pub word_len: WordLen,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub bit_order: BitOrder,
    /// Swap the TX and RX pins at the peripheral.
    pub pin_swap: bool,
    /// RTS/CTS hardware flow control.
    pub flow_control: bool,
    /// Expand `\n` to `\r\n` on the write path; terminals like it.
    pub text_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud: Baud::B115200,
            word_len: WordLen::Bits8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            bit_order: BitOrder::LsbFirst,
            pin_swap: false,
            flow_control: false,
            text_mode: false,
        }
    }
}

/// Board-side pin multiplexing, consumed by [`Usart::open`]. The driver
/// knows which peripheral it is bringing up; only the board knows which
/// package pins that peripheral should appear on.
pub trait UartPinmux {
    fn configure(&self, id: UartId) -> Result<(), SysError>;
}

/// Transfer counters for a port, for diagnostics. Both counters saturate.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Received bytes dropped because the receive ring was full.
    pub rx_dropped: u32,
    /// Hardware overruns (the ISR couldn't keep up with the wire).
    pub overruns: u32,
}

/// Per-peripheral driver state, present while the peripheral is open.
struct Port {
    config: Config,
    tx: ByteQueue<'static>,
    rx: ByteQueue<'static>,
    /// Task blocked waiting for transmit ring space, if any.
    tx_waiter: Option<TaskHandle>,
    /// Task blocked waiting for receive data, if any.
    rx_waiter: Option<TaskHandle>,
    stats: Stats,
}

struct PortSlot(UnsafeCell<Option<Port>>);

// Safety: every access goes through with_port, under the kernel critical
// section.
unsafe impl Sync for PortSlot {}

static PORTS: [PortSlot; UartId::COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const CLOSED: PortSlot = PortSlot(UnsafeCell::new(None));
    [CLOSED; UartId::COUNT]
};

struct RingStorage(UnsafeCell<[u8; UART_RING_SIZE]>);

// Safety: handed out as a &mut only while the owning port is open, under
// with_port.
unsafe impl Sync for RingStorage {}

static TX_STORAGE: [RingStorage; UartId::COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: RingStorage = RingStorage(UnsafeCell::new([0; UART_RING_SIZE]));
    [EMPTY; UartId::COUNT]
};

static RX_STORAGE: [RingStorage; UartId::COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: RingStorage = RingStorage(UnsafeCell::new([0; UART_RING_SIZE]));
    [EMPTY; UartId::COUNT]
};

fn with_port<R>(id: UartId, body: impl FnOnce(&mut Option<Port>) -> R) -> R {
    kern::arch::critical_section(|| {
        // Safety: interrupts are masked, which serializes task-side calls
        // against the interrupt handler; the handler itself runs these
        // sections unpreempted at its own priority.
        body(unsafe { &mut *PORTS[id.index()].0.get() })
    })
}

/// Checks a requested configuration against what the hardware can do,
/// without touching the hardware. Everything `open` rejects, it rejects
/// here, before any side effect.
fn validate(id: UartId, config: &Config) -> Result<(), SysError> {
    if id == UartId::Lpuart1 {
        match config.baud {
            // Auto-baud detection doesn't exist on the low-power
            // peripheral.
            Baud::Auto => return Err(SysError::BadParam),
            baud if baud.lpuart_divisor().is_none() => {
                // The LPUART1 divisor range bottoms out below 38 400 baud
                // at this kernel clock.
                return Err(SysError::Unsupported);
            }
            _ => (),
        }
    }
    Ok(())
}

fn irq_number(id: UartId) -> u32 {
    match id {
        UartId::Usart1 => 37,
        UartId::Usart2 => 38,
        UartId::Usart3 => 39,
        UartId::Lpuart1 => 70,
    }
}

fn enable_clock(id: UartId) {
    let rcc = unsafe { &*device::RCC::ptr() };
    match id {
        UartId::Lpuart1 => set_bits!(rcc.apb1enr2, 1 << 0),
        UartId::Usart1 => set_bits!(rcc.apb2enr, 1 << 14),
        UartId::Usart2 => set_bits!(rcc.apb1enr1, 1 << 17),
        UartId::Usart3 => set_bits!(rcc.apb1enr1, 1 << 18),
    }
}

fn disable_clock(id: UartId) {
    let rcc = unsafe { &*device::RCC::ptr() };
    match id {
        UartId::Lpuart1 => clear_bits!(rcc.apb1enr2, 1 << 0),
        UartId::Usart1 => clear_bits!(rcc.apb2enr, 1 << 14),
        UartId::Usart2 => clear_bits!(rcc.apb1enr1, 1 << 17),
        UartId::Usart3 => clear_bits!(rcc.apb1enr1, 1 << 18),
    }
}

fn tx_interrupt_enable(id: UartId, on: bool) {
    with_regs!(id, |regs| if on {
        set_bits!(regs.cr1, CR1_TXEIE)
    } else {
        clear_bits!(regs.cr1, CR1_TXEIE)
    })
}

/// Handle to an open U(S)ART. Handles are plain values naming the port;
/// operations on a handle whose port has since been closed fail with
/// `BadParam`.
#[derive(Copy, Clone)]
pub struct Usart {
    id: UartId,
}

impl Usart {
    /// Claims `id`, configures it per `config`, and turns it on with
    /// receive interrupts armed.
    ///
    /// Fails with `Unsupported` or `BadParam` for configurations the
    /// peripheral cannot do, and `InUse` if the peripheral is already open;
    /// failures leave no driver state behind (an already-enabled peripheral
    /// clock is left as-is).
    pub fn open(
        id: UartId,
        config: &Config,
        pins: &dyn UartPinmux,
    ) -> Result<Self, SysError> {
        validate(id, config)?;
        with_port(id, |slot| {
            if slot.is_some() {
                return Err(SysError::InUse);
            }
            // Safety: the slot was just confirmed closed, so nothing else
            // holds these storage arrays; the references are dropped with
            // the Port at close.
            let (tx, rx) = unsafe {
                (
                    core::slice::from_raw_parts_mut(
                        TX_STORAGE[id.index()].0.get() as *mut u8,
                        UART_RING_SIZE,
                    ),
                    core::slice::from_raw_parts_mut(
                        RX_STORAGE[id.index()].0.get() as *mut u8,
                        UART_RING_SIZE,
                    ),
                )
            };
            *slot = Some(Port {
                config: *config,
                tx: ByteQueue::new(tx),
                rx: ByteQueue::new(rx),
                tx_waiter: None,
                rx_waiter: None,
                stats: Stats::default(),
            });
            Ok(())
        })?;

        enable_clock(id);
        if let Err(e) = pins.configure(id) {
            with_port(id, |slot| *slot = None);
            return Err(e);
        }
        configure_hardware(id, config);

        kern::isr::set_uart_isr(uart_interrupt);
        kern::arch::enable_irq(irq_number(id), true);
        Ok(Self { id })
    }

    /// Queues all of `data` for transmission, returning `data.len()`.
    ///
    /// Bytes go into the transmit ring and drain under interrupt. When the
    /// ring fills mid-write the calling task blocks until the drain makes
    /// room, so the call can suspend but cannot spin. Task context only.
    pub fn write(&self, data: &[u8]) -> Result<usize, SysError> {
        let text_mode = with_port(self.id, |slot| {
            slot.as_ref()
                .map(|port| port.config.text_mode)
                .ok_or(SysError::BadParam)
        })?;
        for &byte in data {
            if text_mode && byte == b'\n' {
                self.put_byte(b'\r')?;
            }
            self.put_byte(byte)?;
        }
        if !data.is_empty() {
            tx_interrupt_enable(self.id, true);
        }
        Ok(data.len())
    }

    /// Fills all of `data` from the wire, returning `data.len()`. Blocks on
    /// an empty receive ring until the interrupt handler delivers more.
    /// Task context only.
    pub fn read(&self, data: &mut [u8]) -> Result<usize, SysError> {
        for out in data.iter_mut() {
            *out = self.get_byte()?;
        }
        Ok(data.len())
    }

    /// Reads the port's diagnostic counters.
    pub fn stats(&self) -> Result<Stats, SysError> {
        with_port(self.id, |slot| {
            slot.as_ref()
                .map(|port| port.stats)
                .ok_or(SysError::BadParam)
        })
    }

    /// Shuts the peripheral down: interrupts off, receiver and transmitter
    /// off, clock off. Buffered data in both rings is discarded, and any
    /// task still blocked on the port is woken to take an error return.
    pub fn close(self) {
        with_regs!(self.id, |regs| {
            clear_bits!(regs.cr1, CR1_TXEIE | CR1_RXNEIE);
            clear_bits!(regs.cr1, CR1_UE);
        });
        kern::arch::disable_irq(irq_number(self.id), true);
        disable_clock(self.id);
        with_port(self.id, |slot| {
            if let Some(port) = slot.take() {
                if let Some(waiter) = port.tx_waiter {
                    kern::task::unblock(waiter, BlockReason::UartTxFull);
                }
                if let Some(waiter) = port.rx_waiter {
                    kern::task::unblock(waiter, BlockReason::UartRxEmpty);
                }
            }
        });
    }

    fn put_byte(&self, byte: u8) -> Result<(), SysError> {
        loop {
            let queued = with_port(self.id, |slot| {
                let port = slot.as_mut().ok_or(SysError::BadParam)?;
                if port.tx.try_push(byte).is_ok() {
                    return Ok(true);
                }
                // Ring is full. Arm the drain interrupt, name ourselves as
                // the waiter, and block -- all inside the same masked
                // section as the failed push, so the handler cannot drain
                // the ring and issue its wake in between. The actual
                // suspension happens once the mask drops.
                tx_interrupt_enable(self.id, true);
                port.tx_waiter = kern::task::active_task();
                kern::task::block_active(BlockReason::UartTxFull);
                Ok(false)
            })?;
            if queued {
                return Ok(());
            }
            // Woken -- or the scheduler isn't running yet and the block was
            // a no-op, in which case this loop polls while the interrupt
            // drains the ring.
        }
    }

    fn get_byte(&self) -> Result<u8, SysError> {
        loop {
            let popped = with_port(self.id, |slot| {
                let port = slot.as_mut().ok_or(SysError::BadParam)?;
                if let Some(byte) = port.rx.try_pop() {
                    return Ok(Some(byte));
                }
                port.rx_waiter = kern::task::active_task();
                kern::task::block_active(BlockReason::UartRxEmpty);
                Ok(None)
            })?;
            if let Some(byte) = popped {
                return Ok(byte);
            }
        }
    }
}

/// Applies `config` to the peripheral registers and enables it. Interrupts
/// other than receive stay off; the transmit-empty interrupt is armed by
/// `write` when there is something to drain.
fn configure_hardware(id: UartId, config: &Config) {
    with_regs!(id, |regs| {
        // Word length, M1:M0 = 10 for 7 bits, 00 for 8, 01 for 9.
        clear_bits!(regs.cr1, CR1_M0 | CR1_M1);
        match config.word_len {
            WordLen::Bits7 => set_bits!(regs.cr1, CR1_M1),
            WordLen::Bits8 => (),
            WordLen::Bits9 => set_bits!(regs.cr1, CR1_M0),
        }

        clear_bits!(regs.cr2, CR2_STOP_MASK);
        if config.stop_bits == StopBits::Two {
            set_bits!(regs.cr2, CR2_STOP_TWO);
        }

        match config.parity {
            Parity::None => clear_bits!(regs.cr1, CR1_PCE | CR1_PS),
            Parity::Even => {
                set_bits!(regs.cr1, CR1_PCE);
                clear_bits!(regs.cr1, CR1_PS);
            }
            Parity::Odd => set_bits!(regs.cr1, CR1_PCE | CR1_PS),
        }

        if config.pin_swap {
            set_bits!(regs.cr2, CR2_SWAP);
        } else {
            clear_bits!(regs.cr2, CR2_SWAP);
        }

        match config.bit_order {
            BitOrder::LsbFirst => clear_bits!(regs.cr2, CR2_MSBFIRST),
            BitOrder::MsbFirst => set_bits!(regs.cr2, CR2_MSBFIRST),
        }

        if config.flow_control {
            set_bits!(regs.cr3, CR3_CTSE | CR3_RTSE);
        } else {
            clear_bits!(regs.cr3, CR3_CTSE | CR3_RTSE);
        }
    });

    // Baud rate. validate() has already vouched that a divisor exists.
    match id {
        UartId::Lpuart1 => {
            if let Some(divisor) = config.baud.lpuart_divisor() {
                let regs = unsafe { &*device::LPUART1::ptr() };
                regs.brr.write(|w| unsafe { w.bits(divisor) });
            }
        }
        _ => {
            let divisor = config.baud.usart_divisor();
            with_regs!(id, |regs| regs
                .brr
                .write(|w| unsafe { w.bits(divisor) }));
        }
    }

    with_regs!(id, |regs| {
        set_bits!(regs.cr1, CR1_UE);
        // Auto-baud request must follow enable; validate() keeps this off
        // LPUART1.
        if config.baud == Baud::Auto {
            set_bits!(regs.cr2, CR2_ABREN);
        }
        set_bits!(regs.cr1, CR1_TE);
        set_bits!(regs.cr1, CR1_RE);
        set_bits!(regs.cr1, CR1_RXNEIE);
    });
}

/// Common interrupt dispatcher for all four peripherals, registered with
/// the kernel's vector plumbing.
fn uart_interrupt(id: UartId) {
    let isr = with_regs!(id, |regs| regs.isr.read().bits());

    if isr & ISR_ORE != 0 {
        with_regs!(id, |regs| regs
            .icr
            .write(|w| unsafe { w.bits(ICR_ORECF) }));
        with_port(id, |slot| {
            if let Some(port) = slot.as_mut() {
                port.stats.overruns = port.stats.overruns.saturating_add(1);
            }
        });
    }

    if isr & ISR_RXNE != 0 {
        // Reading the data register clears RXNE whether or not anyone wants
        // the byte.
        let byte = with_regs!(id, |regs| regs.rdr.read().bits() as u8);
        with_port(id, |slot| {
            let Some(port) = slot.as_mut() else {
                return;
            };
            if port.rx.try_push(byte).is_err() {
                // Ring overflow: the byte is gone, but the count survives
                // for diagnosis.
                port.stats.rx_dropped = port.stats.rx_dropped.saturating_add(1);
            }
            if let Some(waiter) = port.rx_waiter.take() {
                kern::task::unblock(waiter, BlockReason::UartRxEmpty);
            }
        });
    }

    if isr & ISR_TXE != 0 {
        with_port(id, |slot| {
            let Some(port) = slot.as_mut() else {
                return;
            };
            match port.tx.try_pop() {
                Some(byte) => {
                    with_regs!(id, |regs| regs
                        .tdr
                        .write(|w| unsafe { w.bits(u32::from(byte)) }));
                    if port.tx.is_empty() {
                        tx_interrupt_enable(id, false);
                    }
                }
                None => {
                    // Nothing to send; without this the empty transmit
                    // register would re-raise the interrupt forever.
                    tx_interrupt_enable(id, false);
                }
            }
            if let Some(waiter) = port.tx_waiter.take() {
                kern::task::unblock(waiter, BlockReason::UartTxFull);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpuart_rejects_slow_and_auto_baud() {
        let mut config = Config::default();
        for baud in [Baud::B1200, Baud::B2400, Baud::B4800, Baud::B9600, Baud::B19200] {
            config.baud = baud;
            assert_eq!(
                validate(UartId::Lpuart1, &config),
                Err(SysError::Unsupported),
                "{baud:?} should be below LPUART1's divisor range"
            );
        }
        config.baud = Baud::Auto;
        assert_eq!(
            validate(UartId::Lpuart1, &config),
            Err(SysError::BadParam)
        );
    }

    #[test]
    fn lpuart_accepts_fast_bauds() {
        let mut config = Config::default();
        for baud in [Baud::B38400, Baud::B57600, Baud::B115200] {
            config.baud = baud;
            assert_eq!(validate(UartId::Lpuart1, &config), Ok(()));
        }
    }

    #[test]
    fn usarts_accept_every_baud() {
        let mut config = Config::default();
        for baud in [
            Baud::B1200,
            Baud::B2400,
            Baud::B4800,
            Baud::B9600,
            Baud::B19200,
            Baud::B38400,
            Baud::B57600,
            Baud::B115200,
            Baud::Auto,
        ] {
            config.baud = baud;
            for id in [UartId::Usart1, UartId::Usart2, UartId::Usart3] {
                assert_eq!(validate(id, &config), Ok(()));
            }
        }
    }

    #[test]
    fn divisors_match_the_80mhz_table() {
        assert_eq!(Baud::B115200.usart_divisor(), 0x2B6);
        assert_eq!(Baud::B9600.usart_divisor(), 0x208E);
        assert_eq!(Baud::B1200.usart_divisor(), 0x1_046B);
        // Auto-baud seeds the 115 200 divisor before detection.
        assert_eq!(Baud::Auto.usart_divisor(), Baud::B115200.usart_divisor());

        assert_eq!(Baud::B38400.lpuart_divisor(), Some(0x8_2355));
        assert_eq!(Baud::B57600.lpuart_divisor(), Some(0x5_6CE3));
        assert_eq!(Baud::B115200.lpuart_divisor(), Some(0x2_B671));
        assert_eq!(Baud::B19200.lpuart_divisor(), None);
    }
}
