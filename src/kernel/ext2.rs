// ext2 filesystem, read side.
//
// Layers, bottom up:
//   - read_block: block-sized reads through the BlockIo seam.
//   - superblock and block group descriptor table, decoded at mount.
//   - read_inode: block group and inode table arithmetic.
//   - bmap/read_file: direct and indirect pointer walk, hole fill.
//   - dir_lookup/list_dir: variable-length directory records.
//
// Writing is deliberately stubbed out: every mutating operation fails
// with NotSup until an on-disk writer exists. The VFS face at the
// bottom adapts all of this to the node operations table.
//
// On-disk layout reference: the ext2 revision 1 format; all fields
// little-endian at fixed offsets.

use crate::block::{BlockIo, SECTOR_SIZE};
use crate::errno::Errno;
use crate::stat::VType;
use crate::vfs::{FsOps, NodeInfo, VNode};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use zerocopy::{AsBytes, FromBytes};

pub const EXT2_SUPER_MAGIC: u16 = 0xef53;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
// the superblock always lives at byte offset 1024: LBAs 2 and 3.
pub const EXT2_SUPERBLOCK_LBA: u64 = 2;

pub const EXT2_MIN_BLOCK_SIZE: u32 = 1024;
pub const EXT2_MAX_BLOCK_SIZE: u32 = 4096;

pub const EXT2_ROOT_INO: u32 = 2;
pub const EXT2_NDIRECT: usize = 12;
pub const EXT2_INODE_SIZE: u32 = 128; // revision 0 inode size

// i_mode type bits.
pub const S_IFMT: u16 = 0xf000;
pub const S_IFSOCK: u16 = 0xc000;
pub const S_IFLNK: u16 = 0xa000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFBLK: u16 = 0x6000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFCHR: u16 = 0x2000;
pub const S_IFIFO: u16 = 0x1000;

// directory entry file_type codes.
pub const EXT2_FT_REG_FILE: u8 = 1;
pub const EXT2_FT_DIR: u8 = 2;
pub const EXT2_FT_CHRDEV: u8 = 3;
pub const EXT2_FT_BLKDEV: u8 = 4;
pub const EXT2_FT_FIFO: u8 = 5;
pub const EXT2_FT_SYMLINK: u8 = 7;

// The superblock, through the revision 1 feature words. The on-disk
// record is 1024 bytes; everything past the feature flags is
// bookkeeping this kernel never looks at.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct SuperBlock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32, // block size = 1024 << this
    pub s_log_frag_size: u32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
}

// one 32-byte block group descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct GroupDesc {
    pub bg_block_bitmap: u32,
    pub bg_inode_bitmap: u32,
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
    pub bg_pad: u16,
    pub bg_reserved: [u8; 12],
}

// the 128-byte revision 0 inode; larger on-disk inodes only append
// fields past this prefix.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Inode {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub i_osd1: u32,
    // 12 direct, then single, double, triple indirect
    pub i_block: [u32; 15],
    pub i_generation: u32,
    pub i_file_acl: u32,
    pub i_dir_acl: u32,
    pub i_faddr: u32,
    pub i_osd2: [u8; 12],
}

impl Inode {
    pub fn itype(&self) -> VType {
        match self.i_mode & S_IFMT {
            S_IFREG => VType::File,
            S_IFDIR => VType::Dir,
            S_IFLNK => VType::Symlink,
            S_IFCHR | S_IFBLK => VType::Device,
            S_IFIFO => VType::Pipe,
            _ => VType::None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.i_mode & S_IFMT == S_IFDIR
    }
}

// fixed-size head of a variable-length directory record; the name
// (name_len bytes) follows inline, and rec_len spans both plus
// padding so records exactly tile their block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct DirEntHdr {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

pub const DIRENT_HDR_SIZE: usize = core::mem::size_of::<DirEntHdr>();

pub fn dirent_vtype(file_type: u8) -> VType {
    match file_type {
        EXT2_FT_REG_FILE => VType::File,
        EXT2_FT_DIR => VType::Dir,
        EXT2_FT_SYMLINK => VType::Symlink,
        EXT2_FT_CHRDEV | EXT2_FT_BLKDEV => VType::Device,
        EXT2_FT_FIFO => VType::Pipe,
        _ => VType::None,
    }
}

pub struct Ext2Fs {
    dev: Arc<dyn BlockIo>,
    sb: SuperBlock,
    groups: Vec<GroupDesc>,
    block_size: u32,
    num_groups: u32,
    inode_size: u32,
    inodes_per_block: u32,
}

impl Ext2Fs {
    // Read the superblock and the block group descriptor table and
    // derive the mount-wide geometry.
    pub fn mount(dev: Arc<dyn BlockIo>) -> Result<Arc<Ext2Fs>, Errno> {
        let mut sb_buf = vec![0u8; EXT2_SUPERBLOCK_SIZE];
        dev.read(EXT2_SUPERBLOCK_LBA, &mut sb_buf)?;
        let sb = SuperBlock::read_from_prefix(&sb_buf[..]).ok_or(Errno::FsBadSuper)?;

        if sb.s_magic != EXT2_SUPER_MAGIC {
            return Err(Errno::FsBadSuper);
        }
        let block_size = 1024u32 << sb.s_log_block_size;
        if !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&block_size) {
            return Err(Errno::FsBadSuper);
        }
        if sb.s_blocks_per_group == 0 || sb.s_inodes_per_group == 0 {
            return Err(Errno::FsBadSuper);
        }
        let num_groups =
            (sb.s_blocks_count + sb.s_blocks_per_group - 1) / sb.s_blocks_per_group;
        if num_groups == 0 {
            return Err(Errno::FsBadSuper);
        }
        let inode_size = if sb.s_inode_size > 0 {
            sb.s_inode_size as u32
        } else {
            EXT2_INODE_SIZE
        };

        let mut fs = Ext2Fs {
            dev,
            sb,
            groups: Vec::new(),
            block_size,
            num_groups,
            inode_size,
            inodes_per_block: block_size / inode_size,
        };

        // the descriptor table starts in the block after the
        // superblock and runs for as many blocks as it needs.
        let desc_per_block = block_size as usize / core::mem::size_of::<GroupDesc>();
        let gdt_blocks = (num_groups as usize + desc_per_block - 1) / desc_per_block;
        let gdt_start = fs.sb.s_first_data_block + 1;
        let mut groups = Vec::with_capacity(num_groups as usize);
        let mut block = vec![0u8; block_size as usize];
        for i in 0..gdt_blocks {
            fs.read_block(gdt_start + i as u32, &mut block)?;
            for chunk in block.chunks_exact(core::mem::size_of::<GroupDesc>()) {
                if groups.len() == num_groups as usize {
                    break;
                }
                let desc = GroupDesc::read_from(chunk).ok_or(Errno::FsCorrupt)?;
                groups.push(desc);
            }
        }
        fs.groups = groups;

        Ok(Arc::new(fs))
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    // read one filesystem block through the sector interface.
    fn read_block(&self, bno: u32, buf: &mut [u8]) -> Result<(), Errno> {
        if bno >= self.sb.s_blocks_count {
            return Err(Errno::FsCorrupt);
        }
        let spb = self.block_size as u64 / SECTOR_SIZE as u64;
        self.dev
            .read(bno as u64 * spb, &mut buf[..self.block_size as usize])?;
        Ok(())
    }

    // Fetch inode `ino` from its block group's inode table.
    pub fn read_inode(&self, ino: u32) -> Result<Inode, Errno> {
        if ino == 0 {
            return Err(Errno::Inval);
        }
        if ino > self.sb.s_inodes_count {
            return Err(Errno::FsBadIno);
        }

        let group = (ino - 1) / self.sb.s_inodes_per_group;
        let index = (ino - 1) % self.sb.s_inodes_per_group;
        let desc = self.groups.get(group as usize).ok_or(Errno::FsCorrupt)?;

        let block = desc.bg_inode_table + index / self.inodes_per_block;
        let offset = (index % self.inodes_per_block) as usize * self.inode_size as usize;

        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(block, &mut buf)?;
        Inode::read_from_prefix(&buf[offset..]).ok_or(Errno::FsCorrupt)
    }

    // walk one level of indirection per path element; a zero block
    // number anywhere means the range is a hole.
    fn indirect(&self, mut bno: u32, path: &[u32]) -> Result<u32, Errno> {
        let mut buf = vec![0u8; self.block_size as usize];
        for &i in path {
            if bno == 0 {
                return Ok(0);
            }
            self.read_block(bno, &mut buf)?;
            let off = i as usize * 4;
            bno = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        }
        Ok(bno)
    }

    // map a logical block number to a physical one; 0 means hole.
    fn bmap(&self, ip: &Inode, lbn: u32) -> Result<u32, Errno> {
        let p = self.block_size / 4; // pointers per indirect block
        if lbn < EXT2_NDIRECT as u32 {
            return Ok(ip.i_block[lbn as usize]);
        }
        let lbn = lbn - EXT2_NDIRECT as u32;
        if lbn < p {
            return self.indirect(ip.i_block[12], &[lbn]);
        }
        let lbn = lbn - p;
        if lbn < p * p {
            return self.indirect(ip.i_block[13], &[lbn / p, lbn % p]);
        }
        let lbn = lbn - p * p;
        if lbn < p.saturating_mul(p).saturating_mul(p) {
            return self.indirect(ip.i_block[14], &[lbn / (p * p), (lbn / p) % p, lbn % p]);
        }
        Err(Errno::Inval)
    }

    // Read up to buf.len() bytes of file data starting at byte
    // `offset`. Returns the bytes read, clamped at end of file; holes
    // read as zeroes.
    pub fn read_file(&self, ip: &Inode, offset: u32, buf: &mut [u8]) -> Result<usize, Errno> {
        if offset >= ip.i_size {
            return Ok(0);
        }
        let bs = self.block_size;
        let total = core::cmp::min(buf.len(), (ip.i_size - offset) as usize);
        let mut block = vec![0u8; bs as usize];

        let mut done = 0usize;
        while done < total {
            let pos = offset + done as u32;
            let lbn = pos / bs;
            let boff = (pos % bs) as usize;
            let n = core::cmp::min(bs as usize - boff, total - done);

            match self.bmap(ip, lbn)? {
                0 => {
                    // sparse hole: that span of the file reads as zeroes.
                    for b in &mut buf[done..done + n] {
                        *b = 0;
                    }
                }
                pbn => {
                    self.read_block(pbn, &mut block)?;
                    buf[done..done + n].copy_from_slice(&block[boff..boff + n]);
                }
            }
            done += n;
        }
        Ok(total)
    }

    // Scan the directory's records, calling `visit` for each live
    // entry; entries with inode 0 are tombstones. A record length of
    // zero would loop forever and marks the block as corrupt.
    fn walk_dir(
        &self,
        dip: &Inode,
        visit: &mut dyn FnMut(&[u8], u32, u8) -> bool,
    ) -> Result<(), Errno> {
        if !dip.is_dir() {
            return Err(Errno::NotDir);
        }
        let bs = self.block_size as usize;
        let mut block = vec![0u8; bs];
        let mut off = 0u32;
        while off < dip.i_size {
            let n = self.read_file(dip, off, &mut block)?;
            if n == 0 {
                break;
            }
            let mut c = 0usize;
            while c + DIRENT_HDR_SIZE <= n {
                let hdr =
                    DirEntHdr::read_from_prefix(&block[c..]).ok_or(Errno::FsCorrupt)?;
                if hdr.rec_len == 0 {
                    return Err(Errno::FsCorrupt);
                }
                let name_end = c + DIRENT_HDR_SIZE + hdr.name_len as usize;
                if name_end > n || c + hdr.rec_len as usize > n {
                    return Err(Errno::FsCorrupt);
                }
                if hdr.inode != 0 {
                    let name = &block[c + DIRENT_HDR_SIZE..name_end];
                    if !visit(name, hdr.inode, hdr.file_type) {
                        return Ok(());
                    }
                }
                c += hdr.rec_len as usize;
            }
            off += n as u32;
        }
        Ok(())
    }

    // Find `name` in the directory; NoEnt if it is not there.
    pub fn dir_lookup(&self, dip: &Inode, name: &str) -> Result<u32, Errno> {
        let mut found = 0u32;
        self.walk_dir(dip, &mut |ent_name, ino, _ft| {
            if ent_name == name.as_bytes() {
                found = ino;
                false
            } else {
                true
            }
        })?;
        if found == 0 {
            return Err(Errno::NoEnt);
        }
        Ok(found)
    }

    // Call `visit(name, ino, type)` for every live entry.
    pub fn list_dir(
        &self,
        dip: &Inode,
        visit: &mut dyn FnMut(&str, u32, VType),
    ) -> Result<(), Errno> {
        self.walk_dir(dip, &mut |name, ino, ft| {
            if let Ok(name) = core::str::from_utf8(name) {
                visit(name, ino, dirent_vtype(ft));
            }
            true
        })
    }

    // The write side of the filesystem does not exist yet. Every
    // mutating operation is a stub that reports NotSup, so callers see
    // a clean error instead of silent data loss.

    pub fn write_file(&self, _ip: &Inode, _offset: u32, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    pub fn create_file(&self, _dip: &Inode, _name: &str, _mode: u16) -> Result<u32, Errno> {
        Err(Errno::NotSup)
    }

    pub fn create_dir(&self, _dip: &Inode, _name: &str, _mode: u16) -> Result<u32, Errno> {
        Err(Errno::NotSup)
    }

    pub fn remove_file(&self, _dip: &Inode, _name: &str) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    pub fn remove_dir(&self, _dip: &Inode, _name: &str) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn node_info(&self, ino: u32) -> Result<NodeInfo, Errno> {
        let ip = self.read_inode(ino)?;
        Ok(NodeInfo {
            vtype: ip.itype(),
            size: ip.i_size,
            ino,
        })
    }
}

// node operations face; the VFS dispatches here.
impl FsOps for Ext2Fs {
    fn root(&self) -> Result<NodeInfo, Errno> {
        self.node_info(EXT2_ROOT_INO)
    }

    fn lookup(&self, dir: &VNode, name: &str) -> Result<NodeInfo, Errno> {
        let dip = self.read_inode(dir.ino)?;
        let ino = self.dir_lookup(&dip, name)?;
        self.node_info(ino)
    }

    fn read(&self, node: &VNode, offset: u32, buf: &mut [u8]) -> Result<usize, Errno> {
        let ip = self.read_inode(node.ino)?;
        self.read_file(&ip, offset, buf)
    }

    fn write(&self, node: &VNode, offset: u32, buf: &[u8]) -> Result<usize, Errno> {
        let ip = self.read_inode(node.ino)?;
        self.write_file(&ip, offset, buf)
    }

    fn create(&self, dir: &VNode, name: &str, mode: u16) -> Result<NodeInfo, Errno> {
        let dip = self.read_inode(dir.ino)?;
        let ino = self.create_file(&dip, name, mode)?;
        self.node_info(ino)
    }

    fn mkdir(&self, dir: &VNode, name: &str, mode: u16) -> Result<NodeInfo, Errno> {
        let dip = self.read_inode(dir.ino)?;
        let ino = self.create_dir(&dip, name, mode)?;
        self.node_info(ino)
    }

    fn rmdir(&self, dir: &VNode, name: &str) -> Result<(), Errno> {
        let dip = self.read_inode(dir.ino)?;
        self.remove_dir(&dip, name)
    }

    fn unlink(&self, dir: &VNode, name: &str) -> Result<(), Errno> {
        let dip = self.read_inode(dir.ino)?;
        self.remove_file(&dip, name)
    }

    fn readdir(&self, dir: &VNode, visit: &mut dyn FnMut(&str, u32, VType)) -> Result<(), Errno> {
        let dip = self.read_inode(dir.ino)?;
        self.list_dir(&dip, visit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{ImageBuilder, MemDisk};

    const HELLO: &[u8] = b"Hello, world!\n";

    fn hello_disk() -> Arc<MemDisk> {
        Arc::new(
            ImageBuilder::new(1024)
                .file("test.txt", HELLO)
                .build(),
        )
    }

    #[test]
    fn mount_reads_geometry() {
        let fs = Ext2Fs::mount(hello_disk()).unwrap();
        assert_eq!(fs.superblock().s_magic, EXT2_SUPER_MAGIC);
        assert_eq!(fs.block_size(), 1024);
        assert!(fs.num_groups() >= 1);
    }

    #[test]
    fn mount_rejects_bad_magic() {
        let disk = hello_disk();
        // s_magic lives at byte 56 of the superblock, which starts at
        // byte 1024 of the image.
        disk.patch(1024 + 56, &[0x00, 0x00]);
        match Ext2Fs::mount(disk) {
            Err(Errno::FsBadSuper) => {}
            other => panic!("expected FsBadSuper, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn read_inode_checks_range() {
        let fs = Ext2Fs::mount(hello_disk()).unwrap();
        assert_eq!(fs.read_inode(0).unwrap_err(), Errno::Inval);
        assert_eq!(
            fs.read_inode(fs.superblock().s_inodes_count + 1).unwrap_err(),
            Errno::FsBadIno
        );
        // every valid inode number decodes.
        for ino in 1..=fs.superblock().s_inodes_count {
            fs.read_inode(ino).unwrap();
        }
        assert!(fs.read_inode(EXT2_ROOT_INO).unwrap().is_dir());
    }

    #[test]
    fn lookup_finds_files_and_reports_missing() {
        let fs = Ext2Fs::mount(hello_disk()).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let ino = fs.dir_lookup(&root, "test.txt").unwrap();
        assert!(ino >= EXT2_ROOT_INO);
        assert_eq!(fs.dir_lookup(&root, "nope").unwrap_err(), Errno::NoEnt);
        // looking things up in a file is refused.
        let file = fs.read_inode(ino).unwrap();
        assert_eq!(fs.dir_lookup(&file, "x").unwrap_err(), Errno::NotDir);
    }

    #[test]
    fn read_file_returns_content_and_clamps() {
        let fs = Ext2Fs::mount(hello_disk()).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let ip = fs
            .read_inode(fs.dir_lookup(&root, "test.txt").unwrap())
            .unwrap();
        assert_eq!(ip.i_size as usize, HELLO.len());

        let mut buf = [0u8; 64];
        let n = fs.read_file(&ip, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], HELLO);

        // offset reads and EOF clamping.
        let n = fs.read_file(&ip, 7, &mut buf).unwrap();
        assert_eq!(&buf[..n], &HELLO[7..]);
        assert_eq!(fs.read_file(&ip, ip.i_size, &mut buf).unwrap(), 0);
        assert_eq!(fs.read_file(&ip, ip.i_size + 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn read_file_walks_indirect_blocks() {
        // 13 KiB + 100 spills one block past the direct pointers.
        let len = 13 * 1024 + 100;
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
        let disk = Arc::new(ImageBuilder::new(1024).file("big.bin", &data).build());
        let fs = Ext2Fs::mount(disk).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let ip = fs
            .read_inode(fs.dir_lookup(&root, "big.bin").unwrap())
            .unwrap();

        let mut buf = vec![0u8; len];
        assert_eq!(fs.read_file(&ip, 0, &mut buf).unwrap(), len);
        assert_eq!(buf, data);

        // an unaligned read across the direct/indirect boundary.
        let mut chunk = [0u8; 256];
        let n = fs.read_file(&ip, 12 * 1024 - 100, &mut chunk).unwrap();
        assert_eq!(&chunk[..n], &data[12 * 1024 - 100..12 * 1024 + 156]);
    }

    #[test]
    fn read_file_walks_double_indirect_blocks() {
        // past 12 direct + 256 single-indirect pointers (1 KiB blocks).
        let len = (12 + 256 + 3) * 1024 + 17;
        let data: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
        let disk = Arc::new(ImageBuilder::new(2048).file("huge.bin", &data).build());
        let fs = Ext2Fs::mount(disk).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let ip = fs
            .read_inode(fs.dir_lookup(&root, "huge.bin").unwrap())
            .unwrap();

        let mut buf = vec![0u8; len];
        assert_eq!(fs.read_file(&ip, 0, &mut buf).unwrap(), len);
        assert_eq!(buf, data);
    }

    #[test]
    fn holes_read_as_zeroes() {
        // a file with data in block 0 and block 20, nothing between.
        let disk = Arc::new(
            ImageBuilder::new(1024)
                .sparse_file("sparse.bin", 21 * 1024, &[(0, b"head"), (20 * 1024, b"tail")])
                .build(),
        );
        let fs = Ext2Fs::mount(disk).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let ip = fs
            .read_inode(fs.dir_lookup(&root, "sparse.bin").unwrap())
            .unwrap();

        let mut buf = vec![0xaau8; 21 * 1024];
        assert_eq!(fs.read_file(&ip, 0, &mut buf).unwrap(), 21 * 1024);
        assert_eq!(&buf[..4], b"head");
        assert!(buf[4..20 * 1024].iter().all(|&b| b == 0));
        assert_eq!(&buf[20 * 1024..20 * 1024 + 4], b"tail");
    }

    #[test]
    fn list_dir_skips_tombstones() {
        let disk = Arc::new(
            ImageBuilder::new(1024)
                .file("alive.txt", b"a")
                .file("dead.txt", b"d")
                .build(),
        );
        // zero the inode field of dead.txt's record, turning it into
        // a tombstone.
        let off = disk.find_dirent(ImageBuilder::ROOT_DIR_BLOCK, b"dead.txt").unwrap();
        disk.patch(off, &[0, 0, 0, 0]);

        let fs = Ext2Fs::mount(disk).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        let mut names = Vec::new();
        fs.list_dir(&root, &mut |name, _ino, _t| names.push(name.to_string()))
            .unwrap();
        assert!(names.contains(&"alive.txt".to_string()));
        assert!(!names.contains(&"dead.txt".to_string()));
        assert_eq!(fs.dir_lookup(&root, "dead.txt").unwrap_err(), Errno::NoEnt);
    }

    #[test]
    fn zero_rec_len_is_corruption() {
        let disk = Arc::new(ImageBuilder::new(1024).file("x", b"x").build());
        let off = disk.find_dirent(ImageBuilder::ROOT_DIR_BLOCK, b"x").unwrap();
        // rec_len sits 4 bytes into the record.
        disk.patch(off + 4, &[0, 0]);

        let fs = Ext2Fs::mount(disk).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        assert_eq!(fs.dir_lookup(&root, "x").unwrap_err(), Errno::FsCorrupt);
    }

    #[test]
    fn write_side_is_stubbed() {
        let fs = Ext2Fs::mount(hello_disk()).unwrap();
        let root = fs.read_inode(EXT2_ROOT_INO).unwrap();
        assert_eq!(fs.write_file(&root, 0, b"x").unwrap_err(), Errno::NotSup);
        assert_eq!(fs.create_file(&root, "f", 0o644).unwrap_err(), Errno::NotSup);
        assert_eq!(fs.create_dir(&root, "d", 0o755).unwrap_err(), Errno::NotSup);
        assert_eq!(fs.remove_file(&root, "f").unwrap_err(), Errno::NotSup);
        assert_eq!(fs.remove_dir(&root, "d").unwrap_err(), Errno::NotSup);
    }
}
