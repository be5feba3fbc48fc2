#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
use alloc::sync::Arc;
#[cfg(target_os = "none")]
use kernel::{
    console,
    errno::strerror,
    ext2::Ext2Fs,
    kalloc, kmain, plic, println, trap, vfs,
    virtio_disk::{self, VirtioBlk},
};

#[cfg(target_os = "none")]
kmain!(main);

#[cfg(target_os = "none")]
extern "C" fn main() -> ! {
    console::init();
    println!();
    println!("emberos kernel is booting");
    println!();
    kalloc::init(); // kernel heap
    plic::init(); // route device interrupts
    trap::init(); // trap vector, timer ticks, interrupts on
    vfs::init(); // file descriptor table
    virtio_disk::init() // emulated hard disk
        .unwrap_or_else(|e| panic!("virtio_disk: {}", strerror(e as i32)));

    let fs = Ext2Fs::mount(Arc::new(VirtioBlk))
        .unwrap_or_else(|e| panic!("ext2: {}", strerror(e as i32)));
    vfs::mount_root(fs).unwrap_or_else(|e| panic!("vfs: {}", strerror(e as i32)));
    println!("emberos: root filesystem mounted");

    loop {
        unsafe { riscv::asm::wfi() };
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
