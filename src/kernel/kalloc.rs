// Kernel heap, serving alloc::* for the whole kernel.
//
// A buddy allocator manages the physical memory between the end of the
// kernel image and PHYSTOP. The heap is identity-mapped, which the DMA
// layer (dma.rs) relies on.

use core::alloc::{GlobalAlloc, Layout};

use buddy_alloc::{buddy_alloc::BuddyAlloc, BuddyAllocParam};

use crate::memlayout::PHYSTOP;
use crate::spinlock::Mutex;

// first address after kernel, defined by kernel.ld.
extern "C" {
    static end: [u8; 0];
}

// all blocks handed out are LEAF_SIZE-aligned, which satisfies every
// alignment the kernel asks for (the strictest is the virtqueue
// descriptor table at 16).
const LEAF_SIZE: usize = 4096;

#[global_allocator]
static KMEM: Kmem = Kmem(Mutex::new(None, "kmem"));

struct Kmem(Mutex<Option<BuddyAlloc>>);

// Safety: the buddy allocator's raw pointers are only touched under
// the lock.
unsafe impl Sync for Kmem {}

unsafe impl GlobalAlloc for Kmem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        assert!(layout.align() <= LEAF_SIZE);
        self.0
            .lock()
            .as_mut()
            .expect("kalloc: not initialized")
            .malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0
            .lock()
            .as_mut()
            .expect("kalloc: not initialized")
            .free(ptr)
    }
}

pub fn init() {
    unsafe {
        let base = end.as_ptr();
        let size = (PHYSTOP as *const u8).offset_from(base) as usize;

        let mut kmem = KMEM.0.lock();
        *kmem = Some(BuddyAlloc::new(BuddyAllocParam::new(base, size, LEAF_SIZE)));
    }
}
