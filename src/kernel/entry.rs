use core::arch::global_asm;

// The firmware stage jumps here in supervisor mode with the kernel
// loaded at 0x80200000 (see kernel.ld). Single hart: set up a stack
// for Rust and call main. main never returns; the trailing wfi loop
// only catches a buggy return.
pub const STACK_SIZE: usize = 64 * 1024;

#[repr(C, align(16))]
struct Stack([u8; STACK_SIZE]);

#[no_mangle]
static mut STACK0: Stack = Stack([0; STACK_SIZE]);

global_asm!(
    ".section .text.entry",
    ".globl _entry",
    "_entry:",
    // sp = STACK0 + STACK_SIZE
    "la sp, STACK0",
    "li t0, {stack_size}",
    "add sp, sp, t0",
    "call main",
    "1:",
    "wfi",
    "j 1b",
    stack_size = const STACK_SIZE,
);
