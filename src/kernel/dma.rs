// DMA region allocator.
//
// The virtio driver shares memory with the device: the three virtqueue
// rings and one buffer per in-flight request. Devices see physical
// addresses; the kernel heap is identity-mapped, so a region's physical
// address equals its virtual one. This module is the single place that
// assumption lives, so a future paged kernel only changes dma.rs.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::errno::Errno;

pub struct DmaRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: a DmaRegion is exclusively owned by its allocating request.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    pub fn virt(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    // physical address as programmed into device registers and
    // descriptors. identity mapping: phys == virt.
    pub fn phys(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

pub fn dma_alloc(size: usize, align: usize) -> Result<DmaRegion, Errno> {
    let layout = Layout::from_size_align(size.max(1), align).map_err(|_| Errno::MemAlign)?;
    let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => Ok(DmaRegion { ptr, layout }),
        None => Err(Errno::MemNoMem),
    }
}

pub fn dma_free(region: DmaRegion) {
    drop(region);
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
