// Console output, to the uart.
//
// The kernel is single-flow and has no interactive shell yet, so the
// console is a byte-oriented sink: printf.rs and errno::perror write
// through putc. Input bytes arriving by interrupt are echoed back.

use crate::uart;

const BS: u8 = 0x08;

pub fn init() {
    unsafe { uart::init() }
}

// send one character to the uart.
pub fn putc(c: u8) {
    if c == BS {
        uart::put_byte(BS);
        uart::put_byte(b' ');
        uart::put_byte(BS);
    } else {
        uart::put_byte(c);
    }
}

pub fn puts(s: &str) {
    uart::put_string(s);
}

// the console input interrupt handler; uart::intr() calls this for
// each input character. echo only, for now.
pub fn intr(c: u8) {
    let c = if c == b'\r' { b'\n' } else { c };
    putc(c);
}
