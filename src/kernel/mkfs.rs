// Host-side ext2 image builder and memory-backed disk.
//
// The test suite mounts real ext2 media without hardware: the builder
// lays out a minimal revision-1 filesystem (1 KiB blocks, one block
// group) and MemDisk serves it through the BlockIo seam. The layout is
// fixed so tests can reach into known blocks:
//
//   block 0       boot block (empty)
//   block 1       superblock
//   block 2       block group descriptor table
//   block 3       block bitmap
//   block 4       inode bitmap
//   blocks 5..13  inode table (64 inodes of 128 bytes)
//   block 13      root directory data
//   block 14..    file data and indirect blocks

use crate::block::{BlockIo, SECTOR_SIZE};
use crate::errno::Errno;
use crate::ext2::{
    DirEntHdr, GroupDesc, Inode, SuperBlock, DIRENT_HDR_SIZE, EXT2_FT_DIR, EXT2_FT_REG_FILE,
    EXT2_ROOT_INO, EXT2_SUPER_MAGIC, S_IFDIR, S_IFREG,
};
use crate::spinlock::Mutex;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use zerocopy::AsBytes;

const BLOCK_SIZE: usize = 1024;
const INODE_SIZE: usize = 128;
const INODE_COUNT: u32 = 64;
const INODE_TABLE_BLOCK: u32 = 5;
const POINTERS_PER_BLOCK: u32 = (BLOCK_SIZE / 4) as u32;

pub struct MemDisk {
    data: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data, "memdisk"),
        }
    }

    // overwrite raw image bytes; tests use this to plant corruption.
    pub fn patch(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    // byte offset of the named record inside a directory block.
    pub fn find_dirent(&self, block: u32, name: &[u8]) -> Option<usize> {
        let data = self.data.lock();
        let base = block as usize * BLOCK_SIZE;
        let mut c = base;
        while c + DIRENT_HDR_SIZE <= base + BLOCK_SIZE {
            let rec_len = u16::from_le_bytes([data[c + 4], data[c + 5]]) as usize;
            let name_len = data[c + 6] as usize;
            if rec_len == 0 {
                break;
            }
            if &data[c + DIRENT_HDR_SIZE..c + DIRENT_HDR_SIZE + name_len] == name {
                return Some(c);
            }
            c += rec_len;
        }
        None
    }
}

impl BlockIo for MemDisk {
    fn read(&self, sector: u64, buf: &mut [u8]) -> Result<u32, Errno> {
        let data = self.data.lock();
        let off = sector as usize * SECTOR_SIZE;
        if off + buf.len() > data.len() {
            return Err(Errno::Io);
        }
        buf.copy_from_slice(&data[off..off + buf.len()]);
        Ok((buf.len() / SECTOR_SIZE) as u32)
    }

    fn write(&self, sector: u64, buf: &[u8]) -> Result<u32, Errno> {
        let mut data = self.data.lock();
        let off = sector as usize * SECTOR_SIZE;
        if off + buf.len() > data.len() {
            return Err(Errno::Io);
        }
        data[off..off + buf.len()].copy_from_slice(buf);
        Ok((buf.len() / SECTOR_SIZE) as u32)
    }

    fn capacity(&self) -> u64 {
        (self.data.lock().len() / SECTOR_SIZE) as u64
    }
}

enum Entry {
    File {
        size: u32,
        extents: Vec<(u32, Vec<u8>)>,
    },
    Dir(Vec<(String, Vec<u8>)>),
}

pub struct ImageBuilder {
    blocks: u32,
    entries: Vec<(String, Entry)>,
}

impl ImageBuilder {
    pub const ROOT_DIR_BLOCK: u32 = 13;

    pub fn new(blocks: u32) -> Self {
        Self {
            blocks,
            entries: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push((
            name.to_string(),
            Entry::File {
                size: data.len() as u32,
                extents: vec![(0, data.to_vec())],
            },
        ));
        self
    }

    // a file of `size` bytes with data only at the given extents;
    // untouched blocks stay unallocated and read back as holes.
    pub fn sparse_file(mut self, name: &str, size: u32, extents: &[(u32, &[u8])]) -> Self {
        self.entries.push((
            name.to_string(),
            Entry::File {
                size,
                extents: extents.iter().map(|(o, d)| (*o, d.to_vec())).collect(),
            },
        ));
        self
    }

    // one level of subdirectory with regular files inside.
    pub fn dir(mut self, name: &str, files: &[(&str, &[u8])]) -> Self {
        self.entries.push((
            name.to_string(),
            Entry::Dir(
                files
                    .iter()
                    .map(|(n, d)| (n.to_string(), d.to_vec()))
                    .collect(),
            ),
        ));
        self
    }

    pub fn build(self) -> MemDisk {
        let mut img = Image {
            data: vec![0u8; self.blocks as usize * BLOCK_SIZE],
            next_block: Self::ROOT_DIR_BLOCK,
            next_ino: 10,
        };

        let root_block = img.alloc_block();
        assert_eq!(root_block, Self::ROOT_DIR_BLOCK);

        let mut root_entries: Vec<(u32, u8, String)> = vec![
            (EXT2_ROOT_INO, EXT2_FT_DIR, ".".to_string()),
            (EXT2_ROOT_INO, EXT2_FT_DIR, "..".to_string()),
        ];

        for (name, entry) in &self.entries {
            match entry {
                Entry::File { size, extents } => {
                    let ino = img.alloc_ino();
                    let inode = img.place_file(*size, extents);
                    img.write_inode(ino, &inode);
                    root_entries.push((ino, EXT2_FT_REG_FILE, name.clone()));
                }
                Entry::Dir(files) => {
                    let dir_ino = img.alloc_ino();
                    let dir_block = img.alloc_block();
                    let mut dir_entries: Vec<(u32, u8, String)> = vec![
                        (dir_ino, EXT2_FT_DIR, ".".to_string()),
                        (EXT2_ROOT_INO, EXT2_FT_DIR, "..".to_string()),
                    ];
                    for (fname, data) in files {
                        let ino = img.alloc_ino();
                        let inode =
                            img.place_file(data.len() as u32, &[(0, data.clone())]);
                        img.write_inode(ino, &inode);
                        dir_entries.push((ino, EXT2_FT_REG_FILE, fname.clone()));
                    }
                    img.write_dir_block(dir_block, &dir_entries);

                    let mut inode = Inode::default();
                    inode.i_mode = S_IFDIR | 0o755;
                    inode.i_links_count = 2;
                    inode.i_size = BLOCK_SIZE as u32;
                    inode.i_blocks = 2;
                    inode.i_block[0] = dir_block;
                    img.write_inode(dir_ino, &inode);
                    root_entries.push((dir_ino, EXT2_FT_DIR, name.clone()));
                }
            }
        }

        img.write_dir_block(root_block, &root_entries);
        let mut root = Inode::default();
        root.i_mode = S_IFDIR | 0o755;
        root.i_links_count = 2;
        root.i_size = BLOCK_SIZE as u32;
        root.i_blocks = 2;
        root.i_block[0] = root_block;
        img.write_inode(EXT2_ROOT_INO, &root);

        img.finish(self.blocks)
    }
}

struct Image {
    data: Vec<u8>,
    next_block: u32,
    next_ino: u32,
}

impl Image {
    fn alloc_block(&mut self) -> u32 {
        let b = self.next_block;
        assert!(
            (b as usize + 1) * BLOCK_SIZE <= self.data.len(),
            "mkfs: image too small"
        );
        self.next_block += 1;
        b
    }

    fn alloc_ino(&mut self) -> u32 {
        self.next_ino += 1;
        assert!(self.next_ino <= INODE_COUNT, "mkfs: out of inodes");
        self.next_ino
    }

    fn block_mut(&mut self, bno: u32) -> &mut [u8] {
        let off = bno as usize * BLOCK_SIZE;
        &mut self.data[off..off + BLOCK_SIZE]
    }

    fn put_u32(&mut self, bno: u32, index: u32, val: u32) {
        let off = index as usize * 4;
        self.block_mut(bno)[off..off + 4].copy_from_slice(&val.to_le_bytes());
    }

    fn get_u32(&mut self, bno: u32, index: u32) -> u32 {
        let off = index as usize * 4;
        let b = self.block_mut(bno);
        u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    }

    // hang a data block off the inode's pointer tree, allocating
    // indirect blocks on the way.
    fn set_ptr(&mut self, inode: &mut Inode, lbn: u32, bno: u32) {
        let p = POINTERS_PER_BLOCK;
        if lbn < 12 {
            inode.i_block[lbn as usize] = bno;
            return;
        }
        let l = lbn - 12;
        if l < p {
            if inode.i_block[12] == 0 {
                inode.i_block[12] = self.alloc_block();
            }
            self.put_u32(inode.i_block[12], l, bno);
            return;
        }
        let l = l - p;
        if l < p * p {
            if inode.i_block[13] == 0 {
                inode.i_block[13] = self.alloc_block();
            }
            let lvl1 = inode.i_block[13];
            let mut lvl2 = self.get_u32(lvl1, l / p);
            if lvl2 == 0 {
                lvl2 = self.alloc_block();
                self.put_u32(lvl1, l / p, lvl2);
            }
            self.put_u32(lvl2, l % p, bno);
            return;
        }
        let l = l - p * p;
        if inode.i_block[14] == 0 {
            inode.i_block[14] = self.alloc_block();
        }
        let lvl1 = inode.i_block[14];
        let mut lvl2 = self.get_u32(lvl1, l / (p * p));
        if lvl2 == 0 {
            lvl2 = self.alloc_block();
            self.put_u32(lvl1, l / (p * p), lvl2);
        }
        let mut lvl3 = self.get_u32(lvl2, (l / p) % p);
        if lvl3 == 0 {
            lvl3 = self.alloc_block();
            self.put_u32(lvl2, (l / p) % p, lvl3);
        }
        self.put_u32(lvl3, l % p, bno);
    }

    // allocate blocks only where the extents put data; everything
    // else stays a hole.
    fn place_file(&mut self, size: u32, extents: &[(u32, Vec<u8>)]) -> Inode {
        let mut by_block: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for (start, data) in extents {
            let mut done = 0usize;
            while done < data.len() {
                let pos = *start as usize + done;
                let lbn = (pos / BLOCK_SIZE) as u32;
                let boff = pos % BLOCK_SIZE;
                let n = core::cmp::min(BLOCK_SIZE - boff, data.len() - done);
                let block = by_block.entry(lbn).or_insert_with(|| vec![0u8; BLOCK_SIZE]);
                block[boff..boff + n].copy_from_slice(&data[done..done + n]);
                done += n;
            }
        }

        let mut inode = Inode::default();
        inode.i_mode = S_IFREG | 0o644;
        inode.i_links_count = 1;
        inode.i_size = size;
        for (lbn, content) in by_block {
            let bno = self.alloc_block();
            self.block_mut(bno).copy_from_slice(&content);
            self.set_ptr(&mut inode, lbn, bno);
            inode.i_blocks += (BLOCK_SIZE / 512) as u32;
        }
        inode
    }

    fn write_inode(&mut self, ino: u32, inode: &Inode) {
        let off =
            INODE_TABLE_BLOCK as usize * BLOCK_SIZE + (ino as usize - 1) * INODE_SIZE;
        self.data[off..off + INODE_SIZE].copy_from_slice(inode.as_bytes());
    }

    // records tile the block exactly; the last one absorbs the slack.
    fn write_dir_block(&mut self, bno: u32, entries: &[(u32, u8, String)]) {
        let mut c = 0usize;
        for (i, (ino, ftype, name)) in entries.iter().enumerate() {
            let name_len = name.len();
            let rec_len = if i == entries.len() - 1 {
                BLOCK_SIZE - c
            } else {
                (DIRENT_HDR_SIZE + name_len + 3) & !3
            };
            let hdr = DirEntHdr {
                inode: *ino,
                rec_len: rec_len as u16,
                name_len: name_len as u8,
                file_type: *ftype,
            };
            let block = self.block_mut(bno);
            block[c..c + DIRENT_HDR_SIZE].copy_from_slice(hdr.as_bytes());
            block[c + DIRENT_HDR_SIZE..c + DIRENT_HDR_SIZE + name_len]
                .copy_from_slice(name.as_bytes());
            c += rec_len;
        }
        assert!(c == BLOCK_SIZE, "mkfs: directory block not tiled");
    }

    fn finish(mut self, blocks: u32) -> MemDisk {
        let mut sb = SuperBlock::default();
        sb.s_inodes_count = INODE_COUNT;
        sb.s_blocks_count = blocks;
        sb.s_free_blocks_count = blocks - self.next_block;
        sb.s_free_inodes_count = INODE_COUNT - self.next_ino;
        sb.s_first_data_block = 1;
        sb.s_log_block_size = 0;
        sb.s_log_frag_size = 0;
        sb.s_blocks_per_group = 8192;
        sb.s_frags_per_group = 8192;
        sb.s_inodes_per_group = INODE_COUNT;
        sb.s_magic = EXT2_SUPER_MAGIC;
        sb.s_state = 1;
        sb.s_errors = 1;
        sb.s_rev_level = 1;
        sb.s_first_ino = 11;
        sb.s_inode_size = INODE_SIZE as u16;
        self.data[1024..1024 + core::mem::size_of::<SuperBlock>()]
            .copy_from_slice(sb.as_bytes());

        let mut gd = GroupDesc::default();
        gd.bg_block_bitmap = 3;
        gd.bg_inode_bitmap = 4;
        gd.bg_inode_table = INODE_TABLE_BLOCK;
        gd.bg_free_blocks_count = (blocks - self.next_block) as u16;
        gd.bg_free_inodes_count = (INODE_COUNT - self.next_ino) as u16;
        gd.bg_used_dirs_count = 1;
        self.data[2 * BLOCK_SIZE..2 * BLOCK_SIZE + core::mem::size_of::<GroupDesc>()]
            .copy_from_slice(gd.as_bytes());

        // bitmaps: mark everything up to the allocation cursors.
        for b in 0..self.next_block {
            let byte = 3 * BLOCK_SIZE + (b / 8) as usize;
            self.data[byte] |= 1 << (b % 8);
        }
        for i in 0..self.next_ino {
            let byte = 4 * BLOCK_SIZE + (i / 8) as usize;
            self.data[byte] |= 1 << (i % 8);
        }

        MemDisk::new(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_has_the_superblock_where_ext2_expects_it() {
        let disk = ImageBuilder::new(64).file("a.txt", b"abc").build();
        let mut sector = [0u8; SECTOR_SIZE];
        // the superblock starts at byte 1024, i.e. LBA 2.
        disk.read(2, &mut sector).unwrap();
        let magic = u16::from_le_bytes([sector[56], sector[57]]);
        assert_eq!(magic, EXT2_SUPER_MAGIC);
    }

    #[test]
    fn root_directory_block_is_fixed() {
        let disk = ImageBuilder::new(64).file("a.txt", b"abc").build();
        assert!(disk
            .find_dirent(ImageBuilder::ROOT_DIR_BLOCK, b"a.txt")
            .is_some());
        assert!(disk
            .find_dirent(ImageBuilder::ROOT_DIR_BLOCK, b"missing")
            .is_none());
    }

    #[test]
    fn round_trips_through_the_sector_interface() {
        let disk = ImageBuilder::new(64).build();
        let pattern: Vec<u8> = (0..512).map(|i| (i & 0xff) as u8).collect();
        disk.write(1, &pattern).unwrap();
        let mut out = vec![0u8; 512];
        disk.read(1, &mut out).unwrap();
        assert_eq!(out, pattern);

        let mut big = vec![0u8; 2 * SECTOR_SIZE];
        assert_eq!(disk.read(0, &mut big).unwrap(), 2);
        assert!(disk.read(disk.capacity(), &mut out).is_err());
    }
}
