use crate::{
    memlayout::{UART0_IRQ, VIRTIO0_IRQ},
    plic,
    riscv::{intr_get, intr_on, r_sstatus, r_time, w_sstatus},
    sbi,
    spinlock::Mutex,
    uart,
    virtio_disk::DISK,
};
use core::arch::global_asm;
use riscv::register::*;
use scause::{Interrupt, Trap};

// mtime runs at 10 MHz on the virt board; tick every 10 ms.
const TIMER_INTERVAL: usize = 100_000;

#[derive(PartialEq)]
pub enum Intr {
    Timer,
    Device,
}

pub static TICKS: Mutex<usize> = Mutex::new(0, "time");

pub fn ticks() -> usize {
    *TICKS.lock()
}

// save all registers, call kerneltrap(), restore, return with sret.
global_asm!(
    ".globl kernelvec",
    ".align 4",
    "kernelvec:",
    "addi sp, sp, -256",
    "sd ra, 0(sp)",
    "sd sp, 8(sp)",
    "sd gp, 16(sp)",
    "sd tp, 24(sp)",
    "sd t0, 32(sp)",
    "sd t1, 40(sp)",
    "sd t2, 48(sp)",
    "sd s0, 56(sp)",
    "sd s1, 64(sp)",
    "sd a0, 72(sp)",
    "sd a1, 80(sp)",
    "sd a2, 88(sp)",
    "sd a3, 96(sp)",
    "sd a4, 104(sp)",
    "sd a5, 112(sp)",
    "sd a6, 120(sp)",
    "sd a7, 128(sp)",
    "sd s2, 136(sp)",
    "sd s3, 144(sp)",
    "sd s4, 152(sp)",
    "sd s5, 160(sp)",
    "sd s6, 168(sp)",
    "sd s7, 176(sp)",
    "sd s8, 184(sp)",
    "sd s9, 192(sp)",
    "sd s10, 200(sp)",
    "sd s11, 208(sp)",
    "sd t3, 216(sp)",
    "sd t4, 224(sp)",
    "sd t5, 232(sp)",
    "sd t6, 240(sp)",
    "call kerneltrap",
    "ld ra, 0(sp)",
    "ld sp, 8(sp)",
    "ld gp, 16(sp)",
    "ld t0, 32(sp)",
    "ld t1, 40(sp)",
    "ld t2, 48(sp)",
    "ld s0, 56(sp)",
    "ld s1, 64(sp)",
    "ld a0, 72(sp)",
    "ld a1, 80(sp)",
    "ld a2, 88(sp)",
    "ld a3, 96(sp)",
    "ld a4, 104(sp)",
    "ld a5, 112(sp)",
    "ld a6, 120(sp)",
    "ld a7, 128(sp)",
    "ld s2, 136(sp)",
    "ld s3, 144(sp)",
    "ld s4, 152(sp)",
    "ld s5, 160(sp)",
    "ld s6, 168(sp)",
    "ld s7, 176(sp)",
    "ld s8, 184(sp)",
    "ld s9, 192(sp)",
    "ld s10, 200(sp)",
    "ld s11, 208(sp)",
    "ld t3, 216(sp)",
    "ld t4, 224(sp)",
    "ld t5, 232(sp)",
    "ld t6, 240(sp)",
    "addi sp, sp, 256",
    "sret",
);

// set up to take exceptions and traps, and start the timer.
pub fn init() {
    extern "C" {
        fn kernelvec();
    }
    unsafe {
        stvec::write(kernelvec as usize, stvec::TrapMode::Direct);
        sie::set_sext();
        sie::set_stimer();
        sie::set_ssoft();
    }
    sbi::set_timer(r_time() + TIMER_INTERVAL);
    intr_on();
}

// interrupts and exceptions from kernel code come here via kernelvec,
// on whatever the current kernel stack is.
#[no_mangle]
pub extern "C" fn kerneltrap() {
    let sepc = sepc::read();
    let sstatus_bits = r_sstatus();
    let scause = scause::read();

    assert!(
        sstatus::read().spp() == sstatus::SPP::Supervisor,
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    match scause.cause() {
        Trap::Interrupt(intr) if devintr(intr).is_some() => {}
        _ => {
            println!("scause {:#x}", scause.bits());
            println!("sepc={:#x} stval={:#x}", sepc::read(), stval::read());
            panic!("kerneltrap");
        }
    }

    // the handlers may have caused traps to occur, so restore the trap
    // registers for use by kernelvec's sret instruction.
    unsafe {
        sepc::write(sepc);
    }
    w_sstatus(sstatus_bits);
}

fn clockintr() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
}

// check if it's an external interrupt or a timer interrupt,
// and handle it.
fn devintr(intr: Interrupt) -> Option<Intr> {
    match intr {
        Interrupt::SupervisorExternal => {
            // this is a supervisor external interrupt, via PLIC.

            // irq indicates which device interrupted.
            if let Some(irq) = plic::claim() {
                match irq {
                    UART0_IRQ => uart::intr(),
                    VIRTIO0_IRQ => DISK.intr(),
                    _ => println!("unexpected interrupt irq={}", irq),
                }
                // the PLIC allows each device to raise at most one
                // interrupt at a time; tell the PLIC the device is
                // now allowed to interrupt again.
                plic::complete(irq);
            }

            Some(Intr::Device)
        }
        Interrupt::SupervisorTimer => {
            clockintr();
            sbi::set_timer(r_time() + TIMER_INTERVAL);
            Some(Intr::Timer)
        }
        _ => None,
    }
}
