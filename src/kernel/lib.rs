#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[macro_use]
pub mod printf;
#[cfg(target_os = "none")]
pub mod console;
#[cfg(target_os = "none")]
pub mod dma;
#[cfg(target_os = "none")]
pub mod entry;
#[cfg(target_os = "none")]
pub mod kalloc;
#[cfg(target_os = "none")]
pub mod memlayout;
#[cfg(target_os = "none")]
pub mod plic;
#[cfg(target_os = "none")]
pub mod riscv;
#[cfg(target_os = "none")]
pub mod sbi;
#[cfg(target_os = "none")]
pub mod trap;
#[cfg(target_os = "none")]
pub mod uart;
#[cfg(target_os = "none")]
pub mod virtio_disk;
pub mod block;
pub mod errno;
pub mod ext2;
pub mod fcntl;
#[cfg(not(target_os = "none"))]
pub mod mkfs;
pub mod param;
pub mod spinlock;
pub mod stat;
pub mod syscall;
pub mod vfs;
pub mod virtio;

#[macro_export]
macro_rules! kmain {
    ($path:path) => {
        #[export_name = "main"]
        pub extern "C" fn __main() -> ! {
            // type check the given path
            let f: extern "C" fn() -> ! = $path;

            f()
        }
    };
}
