use crate::{
    block::{BlockIo, SECTOR_SIZE},
    dma::{dma_alloc, DmaRegion},
    errno::Errno,
    memlayout::{VIRTIO0, VIRTIO0_IRQ},
    spinlock::Mutex,
    trap,
    virtio::*,
};
use array_macro::array;
use core::sync::atomic::{fence, Ordering};
use core::{cmp, ptr::NonNull};
use zerocopy::AsBytes;

//
// driver for qemu's virtio disk device.
// uses qemu's mmio interface to virtio.
// qemu presents a "modern" (version 2) virtio interface; legacy
// devices are refused.
//
// qemu ... -global virtio-mmio.force-legacy=false
//          -drive file=fs.img,if=none,format=raw,id=x0
//          -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//

pub static DISK: Mutex<Disk> = Mutex::new(Disk::new(), "virtio_disk");

// ticks are 10 ms apart; give the device five seconds per request.
const REQUEST_TIMEOUT_TICKS: usize = 500;

// track info about in-flight operations, for use when the completion
// interrupt arrives. indexed by the first descriptor index of the
// chain. the interrupt handler only ever sets `done`; everything else
// belongs to the submitting context.
struct Track {
    in_flight: bool,
    done: bool,
    // timed out; its descriptors and buffer stay reserved until the
    // device eventually consumes the chain, so the head index is never
    // given out twice while the device may still own it.
    abandoned: bool,
    region: Option<DmaRegion>,
}

impl Track {
    const fn new() -> Self {
        Self {
            in_flight: false,
            done: false,
            abandoned: false,
            region: None,
        }
    }

    fn clear(&mut self) -> Option<DmaRegion> {
        self.in_flight = false;
        self.done = false;
        self.abandoned = false;
        self.region.take()
    }
}

pub struct Disk {
    base: usize,
    irq: u32,
    // negotiated feature bits
    features: BlkFeature,
    // capacity in 512-byte sectors
    capacity: u64,
    block_size: u32,
    read_only: bool,
    queue: Option<VirtQueue>,
    // the three rings; owned here so they live as long as the device
    // uses them.
    rings: Option<[DmaRegion; 3]>,
    info: [Track; QUEUE_SIZE as usize],
    // statistics
    reads: u64,
    writes: u64,
    errors: u64,
}

enum ReqKind {
    Read,
    Write,
    Flush,
}

impl Disk {
    const fn new() -> Self {
        Self {
            base: VIRTIO0,
            irq: VIRTIO0_IRQ,
            features: BlkFeature::empty(),
            capacity: 0,
            block_size: SECTOR_SIZE as u32,
            read_only: false,
            queue: None,
            rings: None,
            info: array![Track::new(); QUEUE_SIZE as usize],
            reads: 0,
            writes: 0,
            errors: 0,
        }
    }

    // mark the handshake failed and hand the kind to the caller.
    fn fail(&self, e: Errno) -> Errno {
        unsafe {
            let status = Reg::Status.read(self.base);
            Reg::Status.write(self.base, status | DeviceStatus::FAILED.bits());
        }
        e
    }

    fn init(&mut self) -> Result<(), Errno> {
        let base = self.base;

        if Reg::MagicValue.read(base) != VIRTIO_MAGIC {
            return Err(Errno::VirtioMagic);
        }
        // only the modern interface is supported; legacy (version 1)
        // devices use QueuePFN-style setup and are refused.
        match Reg::Version.read(base) {
            VIRTIO_VERSION_MODERN => {}
            _ => return Err(Errno::VirtioVersion),
        }
        // device id 0 means an empty slot.
        if Reg::DeviceId.read(base) != VIRTIO_DEVICE_ID_BLOCK {
            return Err(Errno::VirtioDevice);
        }

        unsafe {
            // reset device.
            Reg::Status.write(base, 0);

            let mut status = DeviceStatus::empty();
            status.insert(DeviceStatus::ACKNOWLEDGE);
            Reg::Status.write(base, status.bits());
            status.insert(DeviceStatus::DRIVER);
            Reg::Status.write(base, status.bits());

            // negotiate features: accept the intersection of what the
            // device offers and what we understand.
            Reg::DeviceFeaturesSel.write(base, 0);
            let lo = Reg::DeviceFeatures.read(base) as u64;
            Reg::DeviceFeaturesSel.write(base, 1);
            let hi = Reg::DeviceFeatures.read(base) as u64;
            let offered = BlkFeature::from_bits_truncate(lo | hi << 32);
            let wanted = BlkFeature::RO
                | BlkFeature::BLK_SIZE
                | BlkFeature::FLUSH
                | BlkFeature::VERSION_1;
            self.features = offered & wanted;
            Reg::DriverFeaturesSel.write(base, 0);
            Reg::DriverFeatures.write(base, self.features.bits() as u32);
            Reg::DriverFeaturesSel.write(base, 1);
            Reg::DriverFeatures.write(base, (self.features.bits() >> 32) as u32);

            // tell device that feature negotiation is complete,
            // and check that it agreed.
            status.insert(DeviceStatus::FEATURES_OK);
            Reg::Status.write(base, status.bits());
            let readback = DeviceStatus::from_bits_truncate(Reg::Status.read(base));
            if !readback.contains(DeviceStatus::FEATURES_OK) {
                return Err(self.fail(Errno::VirtioFeatures));
            }

            // initialize queue 0.
            Reg::QueueSel.write(base, 0);
            if Reg::QueueReady.read(base) != 0 {
                return Err(self.fail(Errno::VirtioQueue));
            }
            let max = Reg::QueueNumMax.read(base);
            if max == 0 {
                return Err(self.fail(Errno::VirtioQueue));
            }
            let size = cmp::min(max, QUEUE_SIZE as u32) as u16;
            Reg::QueueNum.write(base, size as u32);

            // the three rings, physically contiguous and device-shared.
            let desc = dma_alloc(desc_bytes(size), 16).map_err(|_| self.fail(Errno::NoMem))?;
            let avail = dma_alloc(avail_bytes(size), 2).map_err(|_| self.fail(Errno::NoMem))?;
            let used = dma_alloc(used_bytes(size), 4).map_err(|_| self.fail(Errno::NoMem))?;

            Reg::QueueDescLow.write(base, desc.phys() as u32);
            Reg::QueueDescHigh.write(base, (desc.phys() >> 32) as u32);
            Reg::QueueDriverLow.write(base, avail.phys() as u32);
            Reg::QueueDriverHigh.write(base, (avail.phys() >> 32) as u32);
            Reg::QueueDeviceLow.write(base, used.phys() as u32);
            Reg::QueueDeviceHigh.write(base, (used.phys() >> 32) as u32);

            self.queue = Some(VirtQueue::new(
                size,
                NonNull::new_unchecked(desc.virt() as *mut VirtqDesc),
                NonNull::new_unchecked(avail.virt() as *mut VirtqAvail),
                NonNull::new_unchecked(used.virt() as *mut VirtqUsed),
            ));
            self.rings = Some([desc, avail, used]);

            Reg::QueueReady.write(base, 1);

            // device configuration: capacity in sectors, block size if
            // the device exposes one, read-only flag.
            self.capacity = read_config(base, CONFIG_CAPACITY_LOW) as u64
                | (read_config(base, CONFIG_CAPACITY_HIGH) as u64) << 32;
            self.block_size = if self.features.contains(BlkFeature::BLK_SIZE) {
                read_config(base, CONFIG_BLK_SIZE)
            } else {
                SECTOR_SIZE as u32
            };
            self.read_only = self.features.contains(BlkFeature::RO);

            // tell device we're completely ready.
            status.insert(DeviceStatus::DRIVER_OK);
            Reg::Status.write(base, status.bits());
        }

        crate::println!(
            "virtio_disk: {} sectors, irq {}{}",
            self.capacity,
            self.irq,
            if self.read_only { ", read-only" } else { "" }
        );
        Ok(())
    }

    // drain the used ring, publishing completions to their waiters.
    // called with the disk lock held, from both the interrupt handler
    // and the polling submitter.
    fn harvest(&mut self) {
        loop {
            let elem = match self.queue.as_mut().and_then(|q| q.pop_used()) {
                Some(e) => e,
                None => break,
            };
            let id = elem.id as usize;
            if id >= self.info.len() {
                // the device reported a chain we never published.
                self.errors += 1;
                continue;
            }
            if self.info[id].abandoned {
                // a timed-out chain finally came back; its descriptors
                // and buffer can be reclaimed now.
                self.info[id].clear();
                self.queue.as_mut().unwrap().free_chain(id as u16);
            } else if self.info[id].in_flight {
                self.info[id].done = true;
            }
        }
    }
}

impl Mutex<Disk> {
    // submit one request and wait for its completion interrupt,
    // idling the hart between checks.
    fn rw(
        &self,
        kind: ReqKind,
        sector: u64,
        src: Option<&[u8]>,
        dst: Option<&mut [u8]>,
        count: u32,
    ) -> Result<(), Errno> {
        let data_len = match kind {
            ReqKind::Flush => 0,
            _ => count as usize * SECTOR_SIZE,
        };

        // one DMA region per request: header, data, then the status
        // byte the device writes last.
        let mut region =
            dma_alloc(BLK_REQ_HDR_SIZE + data_len + 1, 16).map_err(|_| Errno::NoMem)?;
        let hdr = BlkReqHdr {
            type_: match kind {
                ReqKind::Read => VIRTIO_BLK_T_IN,
                ReqKind::Write => VIRTIO_BLK_T_OUT,
                ReqKind::Flush => VIRTIO_BLK_T_FLUSH,
            },
            reserved: 0,
            sector,
        };
        region.as_mut_slice()[..BLK_REQ_HDR_SIZE].copy_from_slice(hdr.as_bytes());
        if let Some(src) = src {
            region.as_mut_slice()[BLK_REQ_HDR_SIZE..BLK_REQ_HDR_SIZE + data_len]
                .copy_from_slice(&src[..data_len]);
        }
        // device writes 0 on success.
        region.as_mut_slice()[BLK_REQ_HDR_SIZE + data_len] = 0xff;

        let head;
        {
            let mut guard = self.lock();
            let disk = &mut *guard;
            let base = disk.base;
            let q = disk.queue.as_mut().ok_or(Errno::VirtioQueue)?;

            // a request is a chain of three descriptors (two for a
            // flush): header, data, status.
            let ndesc = match kind {
                ReqKind::Flush => 2,
                _ => 3,
            };
            let mut idx = [0u16; 3];
            if !q.alloc_chain(&mut idx[..ndesc]) {
                return Err(Errno::NoMem);
            }

            let hdr_phys = region.phys();
            let data_phys = hdr_phys + BLK_REQ_HDR_SIZE as u64;
            let status_phys = data_phys + data_len as u64;

            q.desc_set(
                idx[0],
                hdr_phys,
                BLK_REQ_HDR_SIZE as u32,
                DescFlags::NEXT,
                idx[1],
            );
            match kind {
                ReqKind::Flush => {
                    q.desc_set(idx[1], status_phys, 1, DescFlags::WRITE, 0);
                }
                ReqKind::Read => {
                    // device writes the data
                    q.desc_set(
                        idx[1],
                        data_phys,
                        data_len as u32,
                        DescFlags::NEXT | DescFlags::WRITE,
                        idx[2],
                    );
                    q.desc_set(idx[2], status_phys, 1, DescFlags::WRITE, 0);
                }
                ReqKind::Write => {
                    // device reads the data
                    q.desc_set(idx[1], data_phys, data_len as u32, DescFlags::NEXT, idx[2]);
                    q.desc_set(idx[2], status_phys, 1, DescFlags::WRITE, 0);
                }
            }

            head = idx[0];
            disk.info[head as usize].in_flight = true;
            disk.info[head as usize].done = false;
            disk.info[head as usize].region = Some(region);

            // tell the device the first index in our chain of
            // descriptors, then ring the doorbell for queue 0.
            q.push_avail(head);
            unsafe {
                Reg::QueueNotify.write(base, 0);
            }
        }

        // wait for the interrupt handler to say this request has
        // finished; poll under the lock in case an interrupt was
        // missed, and idle the hart between checks.
        let deadline = trap::ticks() + REQUEST_TIMEOUT_TICKS;
        let region = loop {
            let mut guard = self.lock();
            guard.harvest();
            let track = &mut guard.info[head as usize];
            if track.done {
                let region = track.clear().unwrap();
                guard.queue.as_mut().unwrap().free_chain(head);
                break region;
            }
            if trap::ticks() > deadline {
                track.in_flight = false;
                track.done = false;
                track.abandoned = true;
                guard.errors += 1;
                return Err(Errno::VirtioTimeout);
            }
            drop(guard);
            unsafe { riscv::asm::wfi() };
        };

        // the used-ring fence in harvest ordered the device's writes
        // before these reads.
        fence(Ordering::SeqCst);
        let status = region.as_slice()[BLK_REQ_HDR_SIZE + data_len];
        let result = match status {
            VIRTIO_BLK_S_OK => Ok(()),
            VIRTIO_BLK_S_UNSUPP => Err(Errno::NotSup),
            _ => Err(Errno::Io),
        };

        {
            let mut guard = self.lock();
            match (&result, &kind) {
                (Ok(()), ReqKind::Read) => guard.reads += 1,
                (Ok(()), ReqKind::Write) => guard.writes += 1,
                (Ok(()), ReqKind::Flush) => {}
                (Err(_), _) => guard.errors += 1,
            }
        }

        if result.is_ok() {
            if let Some(dst) = dst {
                dst[..data_len].copy_from_slice(
                    &region.as_slice()[BLK_REQ_HDR_SIZE..BLK_REQ_HDR_SIZE + data_len],
                );
            }
        }
        crate::dma::dma_free(region);
        result
    }

    fn check_range(&self, sector: u64, buf_len: usize, count: u32) -> Result<(), Errno> {
        if count == 0 || buf_len < count as usize * SECTOR_SIZE {
            return Err(Errno::Inval);
        }
        let guard = self.lock();
        if sector + count as u64 > guard.capacity {
            return Err(Errno::Inval);
        }
        Ok(())
    }

    // read `count` sectors starting at `sector`; returns sectors read.
    pub fn read(&self, sector: u64, buf: &mut [u8], count: u32) -> Result<u32, Errno> {
        self.check_range(sector, buf.len(), count)?;
        self.rw(ReqKind::Read, sector, None, Some(buf), count)?;
        Ok(count)
    }

    // write `count` sectors starting at `sector`; returns sectors
    // written. refused on a read-only device.
    pub fn write(&self, sector: u64, buf: &[u8], count: u32) -> Result<u32, Errno> {
        if self.lock().read_only {
            return Err(Errno::RoFs);
        }
        self.check_range(sector, buf.len(), count)?;
        self.rw(ReqKind::Write, sector, Some(buf), None, count)?;
        Ok(count)
    }

    // flush the device write cache; a no-op when the device did not
    // offer the flush command.
    pub fn flush(&self) -> Result<(), Errno> {
        if !self.lock().features.contains(BlkFeature::FLUSH) {
            return Ok(());
        }
        self.rw(ReqKind::Flush, 0, None, None, 0)
    }

    // cached capacity in 512-byte sectors.
    pub fn capacity(&self) -> u64 {
        self.lock().capacity
    }

    pub fn block_size(&self) -> u32 {
        self.lock().block_size
    }

    pub fn is_read_only(&self) -> bool {
        self.lock().read_only
    }

    // reads, writes, errors since boot.
    pub fn io_counts(&self) -> (u64, u64, u64) {
        let guard = self.lock();
        (guard.reads, guard.writes, guard.errors)
    }

    pub fn intr(&self) {
        let mut guard = self.lock();
        let base = guard.base;
        // bit 0 announces used-ring progress; a clear bit is a
        // spurious interrupt and must not be acknowledged.
        if Reg::InterruptStatus.read(base) & 0x1 == 0 {
            return;
        }
        guard.harvest();
        unsafe {
            Reg::InterruptAck.write(base, 0x1);
        }
    }
}

// block-device face of the virtio disk, consumed by the filesystem.
pub struct VirtioBlk;

impl BlockIo for VirtioBlk {
    fn read(&self, sector: u64, buf: &mut [u8]) -> Result<u32, Errno> {
        let count = (buf.len() / SECTOR_SIZE) as u32;
        DISK.read(sector, buf, count)
    }

    fn write(&self, sector: u64, buf: &[u8]) -> Result<u32, Errno> {
        let count = (buf.len() / SECTOR_SIZE) as u32;
        DISK.write(sector, buf, count)
    }

    fn capacity(&self) -> u64 {
        DISK.capacity()
    }
}

pub fn init() -> Result<(), Errno> {
    DISK.lock().init()
}
