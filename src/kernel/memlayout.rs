// Physical memory layout of the qemu -machine virt board.
//
// 0x02000000 -- CLINT (owned by the firmware; we take timer ticks via SBI)
// 0x0c000000 -- PLIC
// 0x10000000 -- uart0
// 0x10001000 -- virtio mmio disk interface
// 0x80000000 -- firmware (OpenSBI)
// 0x80200000 -- kernel text and data
// end        -- kernel heap, up to PHYSTOP

pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO0_IRQ: u32 = 1;

pub const PLIC: usize = 0x0c00_0000;

pub const KERNBASE: usize = 0x8020_0000;
pub const PHYSTOP: usize = 0x8800_0000;
