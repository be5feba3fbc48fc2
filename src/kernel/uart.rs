// Low-level driver for the 16550a UART on the qemu virt board.
//
// Output is synchronous: put_byte spins on the transmit-holding bit so
// that panic messages always make it out. Received bytes are drained by
// the interrupt handler and echoed; the kernel has no line discipline.

use crate::memlayout::UART0;
use core::ptr::{read_volatile, write_volatile};

// the UART control registers, relative to UART0.
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const FCR: usize = 2; // FIFO control register
const ISR: usize = 2; // interrupt status register
const LCR: usize = 3; // line control register
const LSR: usize = 5; // line status register

const IER_RX_ENABLE: u8 = 1 << 0;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const LCR_EIGHT_BITS: u8 = 3 << 0;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character

fn read_reg(reg: usize) -> u8 {
    unsafe { read_volatile((UART0 + reg) as *const u8) }
}

unsafe fn write_reg(reg: usize, v: u8) {
    write_volatile((UART0 + reg) as *mut u8, v)
}

pub unsafe fn init() {
    // disable interrupts.
    write_reg(IER, 0x00);
    // special mode to set baud rate.
    write_reg(LCR, LCR_BAUD_LATCH);
    // LSB for baud rate of 38.4K.
    write_reg(0, 0x03);
    // MSB for baud rate of 38.4K.
    write_reg(1, 0x00);
    // leave set-baud mode, and set word length to 8 bits, no parity.
    write_reg(LCR, LCR_EIGHT_BITS);
    // reset and enable FIFOs.
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    // enable receive interrupts.
    write_reg(IER, IER_RX_ENABLE);
}

// write one output byte to the uart, spinning until
// the transmit holding register is empty.
pub fn put_byte(c: u8) {
    while read_reg(LSR) & LSR_TX_IDLE == 0 {}
    unsafe { write_reg(THR, c) }
}

pub fn put_string(s: &str) {
    for c in s.bytes() {
        put_byte(c);
    }
}

// read one input byte, if one is waiting.
pub fn get_byte() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}

// handle a uart interrupt: drain the receive FIFO.
// called from trap.rs.
pub fn intr() {
    while let Some(c) = get_byte() {
        crate::console::intr(c);
    }
    // reading ISR clears a pending transmit interrupt, if any.
    let _ = read_reg(ISR);
}
