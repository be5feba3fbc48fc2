// Virtual filesystem layer.
//
// A mounted filesystem exposes its objects as VNodes dispatched
// through the FsOps operations table; operations a filesystem does not
// implement fall through to defaults that report NotSup. Nodes are
// interned in an arena keyed by inode number, so every fd open on the
// same file shares one node (and its size), and future `..` back-edges
// stay index-shaped instead of creating ownership cycles.
//
// The fd table is process-global: the kernel runs one flow of control.
// A multi-process successor moves it into the process control block
// without changing this module's contract.
//
// Locking: the mount and fd tables are spinlock-protected and never
// held across filesystem I/O; calls into FsOps happen with cloned
// handles only.

use crate::errno::{clear_errno, set_errno, Errno};
use crate::fcntl::{OMode, SEEK_CUR, SEEK_END, SEEK_SET};
use crate::param::{MAXNAME, NFILE};
use crate::spinlock::Mutex;
use crate::stat::{Stat, VType};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use array_macro::array;
use core::sync::atomic::{AtomicU32, Ordering};

// what a filesystem tells the VFS about one of its objects.
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    pub vtype: VType,
    pub size: u32,
    pub ino: u32,
}

// One open-able filesystem object. The node is owned by the mount and
// shared by every fd open on it; size is the only mutable field.
pub struct VNode {
    pub vtype: VType,
    // filesystem-private handle (inode number for ext2).
    pub ino: u32,
    size: AtomicU32,
    fs: Arc<dyn FsOps>,
}

impl VNode {
    fn new(info: NodeInfo, fs: Arc<dyn FsOps>) -> Self {
        Self {
            vtype: info.vtype,
            ino: info.ino,
            size: AtomicU32::new(info.size),
            fs,
        }
    }

    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn set_size(&self, size: u32) {
        self.size.store(size, Ordering::Relaxed);
    }
}

// The capability set a filesystem may support. Defaulted methods
// report NotSup, which is the contract for absent capabilities.
pub trait FsOps: Send + Sync {
    // the filesystem's root object; called once at mount.
    fn root(&self) -> Result<NodeInfo, Errno>;

    fn lookup(&self, _dir: &VNode, _name: &str) -> Result<NodeInfo, Errno> {
        Err(Errno::NotSup)
    }

    fn read(&self, _node: &VNode, _offset: u32, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn write(&self, _node: &VNode, _offset: u32, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::NotSup)
    }

    fn open(&self, _node: &VNode, _mode: OMode) -> Result<(), Errno> {
        Ok(())
    }

    fn close(&self, _node: &VNode) {}

    fn create(&self, _dir: &VNode, _name: &str, _mode: u16) -> Result<NodeInfo, Errno> {
        Err(Errno::NotSup)
    }

    fn mkdir(&self, _dir: &VNode, _name: &str, _mode: u16) -> Result<NodeInfo, Errno> {
        Err(Errno::NotSup)
    }

    fn rmdir(&self, _dir: &VNode, _name: &str) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn unlink(&self, _dir: &VNode, _name: &str) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }

    fn readdir(
        &self,
        _dir: &VNode,
        _visit: &mut dyn FnMut(&str, u32, VType),
    ) -> Result<(), Errno> {
        Err(Errno::NotSup)
    }
}

struct Mount {
    fs: Arc<dyn FsOps>,
    root: Arc<VNode>,
    // node arena: one VNode per inode, shared by all fds.
    nodes: BTreeMap<u32, Arc<VNode>>,
}

static ROOT_FS: Mutex<Option<Mount>> = Mutex::new(None, "vfs_root");

// one row of the process-global open-file table.
struct FileDesc {
    node: Option<Arc<VNode>>,
    mode: OMode,
    pos: u32,
    in_use: bool,
}

impl FileDesc {
    const fn new() -> Self {
        Self {
            node: None,
            mode: OMode::new(0),
            pos: 0,
            in_use: false,
        }
    }
}

// fds 0..3 are reserved for stdin/stdout/stderr.
const FD_RESERVED: usize = 3;

static FDTABLE: Mutex<[FileDesc; NFILE]> = Mutex::new(array![_ => FileDesc::new(); NFILE], "ftable");

pub fn init() {
    let mut table = FDTABLE.lock();
    for row in table.iter_mut() {
        *row = FileDesc::new();
    }
    for row in table.iter_mut().take(FD_RESERVED) {
        row.in_use = true;
    }
}

// Mount `fs` as the root filesystem, replacing any previous mount.
pub fn mount_root(fs: Arc<dyn FsOps>) -> Result<(), Errno> {
    let r = (|| {
        let info = fs.root()?;
        if info.vtype != VType::Dir {
            return Err(Errno::NotDir);
        }
        let root = Arc::new(VNode::new(info, fs.clone()));
        let mut nodes = BTreeMap::new();
        nodes.insert(root.ino, root.clone());
        *ROOT_FS.lock() = Some(Mount { fs, root, nodes });
        Ok(())
    })();
    match r {
        Ok(()) => clear_errno(),
        Err(e) => set_errno(e),
    }
    r
}

// fs handle and root node of the current mount, without holding the
// lock across any I/O.
fn mount_snapshot() -> Result<(Arc<dyn FsOps>, Arc<VNode>), Errno> {
    let guard = ROOT_FS.lock();
    let mount = guard.as_ref().ok_or(Errno::Inval)?;
    Ok((mount.fs.clone(), mount.root.clone()))
}

// fetch-or-create the shared node for `info`.
fn intern_node(info: NodeInfo) -> Result<Arc<VNode>, Errno> {
    let mut guard = ROOT_FS.lock();
    let mount = guard.as_mut().ok_or(Errno::Inval)?;
    if let Some(node) = mount.nodes.get(&info.ino) {
        return Ok(node.clone());
    }
    let node = Arc::new(VNode::new(info, mount.fs.clone()));
    mount.nodes.insert(info.ino, node.clone());
    Ok(node)
}

// path components are silently truncated at MAXNAME bytes.
fn truncate_name(comp: &str) -> &str {
    if comp.len() <= MAXNAME {
        return comp;
    }
    let mut end = MAXNAME;
    while !comp.is_char_boundary(end) {
        end -= 1;
    }
    &comp[..end]
}

// Resolve an absolute path to its node. Empty components are skipped,
// so "//a//b" and "/a/b" name the same object.
pub fn resolve(path: &str) -> Result<Arc<VNode>, Errno> {
    if !path.starts_with('/') {
        return Err(Errno::Inval);
    }
    let (fs, mut cur) = mount_snapshot()?;
    for comp in path.split('/') {
        if comp.is_empty() {
            continue;
        }
        let info = fs.lookup(&cur, truncate_name(comp))?;
        cur = intern_node(info)?;
    }
    Ok(cur)
}

// split "/name" for the operations that are restricted to the root
// directory for now; deeper paths report NotSup.
fn root_child(path: &str) -> Result<&str, Errno> {
    let rest = path.strip_prefix('/').ok_or(Errno::Inval)?;
    if rest.is_empty() {
        return Err(Errno::Inval);
    }
    if rest.contains('/') {
        return Err(Errno::NotSup);
    }
    Ok(truncate_name(rest))
}

fn alloc_fd() -> Result<usize, Errno> {
    let mut table = FDTABLE.lock();
    for fd in FD_RESERVED..NFILE {
        if !table[fd].in_use {
            table[fd] = FileDesc::new();
            table[fd].in_use = true;
            return Ok(fd);
        }
    }
    Err(Errno::MFile)
}

fn free_fd(fd: usize) {
    let mut table = FDTABLE.lock();
    table[fd] = FileDesc::new();
}

// node, position and mode of an fd in use.
fn fd_get(fd: usize) -> Result<(Arc<VNode>, u32, OMode), Errno> {
    let table = FDTABLE.lock();
    let row = table.get(fd).ok_or(Errno::BadF)?;
    if !row.in_use {
        return Err(Errno::BadF);
    }
    let node = row.node.as_ref().ok_or(Errno::BadF)?;
    Ok((node.clone(), row.pos, row.mode))
}

fn fd_set_pos(fd: usize, pos: u32) {
    let mut table = FDTABLE.lock();
    if table[fd].in_use {
        table[fd].pos = pos;
    }
}

// translate an inner result to the public sentinel-plus-errno form.
fn ret(r: Result<usize, Errno>) -> isize {
    match r {
        Ok(v) => {
            clear_errno();
            v as isize
        }
        Err(e) => {
            set_errno(e);
            -1
        }
    }
}

pub fn open(path: &str, flags: u32) -> isize {
    ret(open_inner(path, flags))
}

fn open_inner(path: &str, flags: u32) -> Result<usize, Errno> {
    let mode = OMode::new(flags);

    let node = match resolve(path) {
        Ok(node) => node,
        Err(Errno::NoEnt) if mode.is_create() => {
            // creation is limited to the root directory for now.
            let name = root_child(path)?;
            let (fs, root) = mount_snapshot()?;
            fs.create(&root, name, 0o644)?;
            resolve(path)?
        }
        Err(e) => return Err(e),
    };

    if mode.is_directory() && node.vtype != VType::Dir {
        return Err(Errno::NotDir);
    }

    let fd = alloc_fd()?;
    // partial failure must leave the table exactly as it was.
    if let Err(e) = node.fs.open(&node, mode) {
        free_fd(fd);
        return Err(e);
    }

    if mode.is_trunc() {
        // filesystems without truncate support ignore this for reads;
        // only the shared size is reset.
        node.set_size(0);
    }
    let pos = if mode.is_append() { node.size() } else { 0 };

    {
        let mut table = FDTABLE.lock();
        table[fd].node = Some(node);
        table[fd].mode = mode;
        table[fd].pos = pos;
    }
    Ok(fd)
}

pub fn read(fd: usize, buf: &mut [u8]) -> isize {
    ret(read_inner(fd, buf))
}

fn read_inner(fd: usize, buf: &mut [u8]) -> Result<usize, Errno> {
    let (node, pos, mode) = fd_get(fd)?;
    if !mode.readable() {
        return Err(Errno::Acces);
    }
    let n = node.fs.read(&node, pos, buf)?;
    fd_set_pos(fd, pos.wrapping_add(n as u32));
    Ok(n)
}

pub fn write(fd: usize, buf: &[u8]) -> isize {
    ret(write_inner(fd, buf))
}

fn write_inner(fd: usize, buf: &[u8]) -> Result<usize, Errno> {
    let (node, pos, mode) = fd_get(fd)?;
    if !mode.writable() {
        return Err(Errno::Acces);
    }
    let n = node.fs.write(&node, pos, buf)?;
    let newpos = pos.wrapping_add(n as u32);
    if newpos > node.size() {
        node.set_size(newpos);
    }
    fd_set_pos(fd, newpos);
    Ok(n)
}

pub fn seek(fd: usize, offset: i32, whence: u32) -> isize {
    ret(seek_inner(fd, offset, whence))
}

fn seek_inner(fd: usize, offset: i32, whence: u32) -> Result<usize, Errno> {
    let (node, pos, _) = fd_get(fd)?;
    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => pos,
        SEEK_END => node.size(),
        _ => return Err(Errno::Inval),
    };
    // signed offsets wrap through the u32 position; no clamping, and
    // positions past the end just read 0 bytes.
    let newpos = base.wrapping_add(offset as u32);
    fd_set_pos(fd, newpos);
    Ok(newpos as usize)
}

pub fn close(fd: usize) -> isize {
    ret(close_inner(fd))
}

fn close_inner(fd: usize) -> Result<usize, Errno> {
    let node = {
        let mut table = FDTABLE.lock();
        let row = table.get_mut(fd).ok_or(Errno::BadF)?;
        if !row.in_use {
            return Err(Errno::BadF);
        }
        let node = row.node.take();
        *row = FileDesc::new();
        node
    };
    if let Some(node) = node {
        node.fs.close(&node);
    }
    Ok(0)
}

pub fn stat(path: &str, st: &mut Stat) -> isize {
    ret(stat_inner(path, st))
}

fn stat_inner(path: &str, st: &mut Stat) -> Result<usize, Errno> {
    let node = resolve(path)?;
    st.size = node.size();
    st.vtype = node.vtype;
    Ok(0)
}

pub fn mkdir(path: &str, mode: u16) -> isize {
    ret(mkdir_inner(path, mode))
}

fn mkdir_inner(path: &str, mode: u16) -> Result<usize, Errno> {
    let name = root_child(path)?;
    let (fs, root) = mount_snapshot()?;
    fs.mkdir(&root, name, mode)?;
    Ok(0)
}

pub fn rmdir(path: &str) -> isize {
    ret(rmdir_inner(path))
}

fn rmdir_inner(path: &str) -> Result<usize, Errno> {
    let name = root_child(path)?;
    let (fs, root) = mount_snapshot()?;
    fs.rmdir(&root, name)?;
    Ok(0)
}

pub fn unlink(path: &str) -> isize {
    ret(unlink_inner(path))
}

fn unlink_inner(path: &str) -> Result<usize, Errno> {
    let name = root_child(path)?;
    let (fs, root) = mount_snapshot()?;
    fs.unlink(&root, name)?;
    Ok(0)
}

// list a directory by path; used by the shell-side `ls`.
pub fn list_dir(path: &str, visit: &mut dyn FnMut(&str, u32, VType)) -> isize {
    let r = (|| {
        let node = resolve(path)?;
        let (fs, _) = mount_snapshot()?;
        fs.readdir(&node, visit)?;
        Ok(0)
    })();
    ret(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::{get_errno, test_guard};
    use crate::ext2::Ext2Fs;
    use crate::fcntl::*;
    use crate::mkfs::{ImageBuilder, MemDisk};

    const HELLO: &[u8] = b"Hello, world!\n";

    fn hello_image() -> Arc<MemDisk> {
        Arc::new(
            ImageBuilder::new(1024)
                .file("test.txt", HELLO)
                .dir("sub", &[("file.txt", b"nested\n")])
                .build(),
        )
    }

    fn setup(disk: Arc<MemDisk>) {
        init();
        let fs = Ext2Fs::mount(disk).unwrap();
        mount_root(fs).unwrap();
    }

    fn in_use_fds() -> Vec<usize> {
        let table = FDTABLE.lock();
        (0..NFILE).filter(|&fd| table[fd].in_use).collect()
    }

    #[test]
    fn stat_reports_size_and_type() {
        let _g = test_guard();
        setup(hello_image());

        let mut st = Stat::default();
        assert_eq!(stat("/test.txt", &mut st), 0);
        assert_eq!(st.size, 14);
        assert_eq!(st.vtype, VType::File);

        assert_eq!(stat("/", &mut st), 0);
        assert_eq!(st.vtype, VType::Dir);

        assert_eq!(stat("/nope", &mut st), -1);
        assert_eq!(get_errno(), Errno::NoEnt as i32);
    }

    #[test]
    fn open_read_close() {
        let _g = test_guard();
        setup(hello_image());

        let fd = open("/test.txt", O_RDONLY);
        assert!(fd >= 3);
        let fd = fd as usize;

        let mut buf = [0u8; 14];
        assert_eq!(read(fd, &mut buf), 14);
        assert_eq!(&buf, HELLO);

        // a second read sits at EOF.
        let mut buf2 = [0u8; 10];
        assert_eq!(read(fd, &mut buf2), 0);

        assert_eq!(close(fd), 0);
        assert_eq!(read(fd, &mut buf2), -1);
        assert_eq!(get_errno(), Errno::BadF as i32);
    }

    #[test]
    fn fd_positions_are_independent() {
        let _g = test_guard();
        setup(hello_image());

        let fd1 = open("/test.txt", O_RDONLY) as usize;
        let fd2 = open("/test.txt", O_RDONLY) as usize;
        assert_ne!(fd1, fd2);

        let mut b1 = [0u8; 5];
        let mut b2 = [0u8; 5];
        assert_eq!(read(fd1, &mut b1), 5);
        assert_eq!(&b1, b"Hello");
        assert_eq!(read(fd2, &mut b2), 5);
        assert_eq!(&b2, b"Hello");

        assert_eq!(seek(fd1, 10, SEEK_SET), 10);
        assert_eq!(read(fd2, &mut b2), 5);
        assert_eq!(&b2, b", wor");

        close(fd1);
        close(fd2);
    }

    #[test]
    fn two_fds_share_the_node() {
        let _g = test_guard();
        setup(hello_image());

        let fd1 = open("/test.txt", O_RDONLY) as usize;
        let fd2 = open("/test.txt", O_RDONLY) as usize;
        let (n1, _, _) = fd_get(fd1).unwrap();
        let (n2, _, _) = fd_get(fd2).unwrap();
        assert!(Arc::ptr_eq(&n1, &n2));
        assert_eq!(n1.size(), 14);
        close(fd1);
        close(fd2);
    }

    #[test]
    fn bad_fd_reports_ebadf() {
        let _g = test_guard();
        setup(hello_image());

        let mut buf = [0u8; 16];
        assert_eq!(read(999, &mut buf), -1);
        assert_eq!(get_errno(), Errno::BadF as i32);
        assert_eq!(write(999, &buf), -1);
        assert_eq!(get_errno(), Errno::BadF as i32);
        // the reserved console fds carry no node.
        assert_eq!(read(1, &mut buf), -1);
        assert_eq!(get_errno(), Errno::BadF as i32);
    }

    #[test]
    fn later_calls_overwrite_errno() {
        let _g = test_guard();
        setup(hello_image());

        assert_eq!(open("/nope", O_RDONLY), -1);
        assert_eq!(get_errno(), Errno::NoEnt as i32);

        let mut buf = [0u8; 16];
        assert_eq!(read(999, &mut buf), -1);
        assert_eq!(get_errno(), Errno::BadF as i32);
    }

    #[test]
    fn failed_open_restores_the_fd_table() {
        let _g = test_guard();
        setup(hello_image());

        let before = in_use_fds();
        assert_eq!(open("/nope", O_RDONLY), -1);
        assert_eq!(in_use_fds(), before);

        // O_CREAT reaches the filesystem, which cannot create; the
        // reserved fd must be handed back.
        assert_eq!(open("/newfile", O_CREAT | O_RDWR), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);
        assert_eq!(in_use_fds(), before);
    }

    #[test]
    fn resolution_is_idempotent() {
        let _g = test_guard();
        setup(hello_image());

        let a = resolve("/sub/file.txt").unwrap();
        let b = resolve("//sub//file.txt").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let fd = open("/sub/file.txt", O_RDONLY) as usize;
        let mut buf = [0u8; 7];
        assert_eq!(read(fd, &mut buf), 7);
        assert_eq!(&buf, b"nested\n");
        close(fd);
    }

    #[test]
    fn relative_paths_are_rejected() {
        let _g = test_guard();
        setup(hello_image());
        assert_eq!(open("test.txt", O_RDONLY), -1);
        assert_eq!(get_errno(), Errno::Inval as i32);
    }

    #[test]
    fn component_names_are_truncated_not_fatal() {
        let _g = test_guard();
        setup(hello_image());
        let long = alloc::format!("/{}", "x".repeat(400));
        assert_eq!(open(&long, O_RDONLY), -1);
        assert_eq!(get_errno(), Errno::NoEnt as i32);
    }

    #[test]
    fn seek_end_then_read_returns_zero() {
        let _g = test_guard();
        setup(hello_image());

        let fd = open("/test.txt", O_RDONLY) as usize;
        assert_eq!(seek(fd, 0, SEEK_END), 14);
        let mut buf = [0u8; 8];
        assert_eq!(read(fd, &mut buf), 0);

        // no clamping: positions beyond the end are legal and read 0.
        assert_eq!(seek(fd, 100, SEEK_END), 114);
        assert_eq!(read(fd, &mut buf), 0);

        assert_eq!(seek(fd, 0, SEEK_SET), 0);
        assert_eq!(seek(fd, 3, SEEK_CUR), 3);
        assert_eq!(seek(fd, 0, 77), -1);
        assert_eq!(get_errno(), Errno::Inval as i32);
        close(fd);
    }

    #[test]
    fn access_mode_is_enforced() {
        let _g = test_guard();
        setup(hello_image());

        let fd = open("/test.txt", O_WRONLY) as usize;
        let mut buf = [0u8; 4];
        assert_eq!(read(fd, &mut buf), -1);
        assert_eq!(get_errno(), Errno::Acces as i32);
        close(fd);

        let fd = open("/test.txt", O_RDONLY) as usize;
        assert_eq!(write(fd, b"data"), -1);
        assert_eq!(get_errno(), Errno::Acces as i32);
        close(fd);
    }

    #[test]
    fn trunc_and_append_affect_size_and_position() {
        let _g = test_guard();
        setup(hello_image());

        let fd = open("/test.txt", O_RDONLY | O_APPEND) as usize;
        assert_eq!(seek(fd, 0, SEEK_CUR), 14);
        close(fd);

        let fd = open("/test.txt", O_RDONLY | O_TRUNC) as usize;
        let mut st = Stat::default();
        assert_eq!(stat("/test.txt", &mut st), 0);
        assert_eq!(st.size, 0);
        close(fd);
    }

    #[test]
    fn directory_modifications_are_root_only_stubs() {
        let _g = test_guard();
        setup(hello_image());

        // delegated to the filesystem, which stubs them out.
        assert_eq!(mkdir("/newdir", 0o755), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);
        assert_eq!(unlink("/test.txt"), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);
        assert_eq!(rmdir("/sub"), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);

        // deeper paths never reach the filesystem.
        assert_eq!(mkdir("/sub/deep", 0o755), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);
        assert_eq!(open("/sub/new.txt", O_CREAT | O_RDWR), -1);
        assert_eq!(get_errno(), Errno::NotSup as i32);
    }

    #[test]
    fn o_directory_requires_a_directory() {
        let _g = test_guard();
        setup(hello_image());
        assert_eq!(open("/test.txt", O_RDONLY | O_DIRECTORY), -1);
        assert_eq!(get_errno(), Errno::NotDir as i32);
        let fd = open("/sub", O_RDONLY | O_DIRECTORY);
        assert!(fd >= 3);
        close(fd as usize);
    }

    #[test]
    fn readdir_lists_the_root() {
        let _g = test_guard();
        setup(hello_image());
        let mut names = Vec::new();
        assert_eq!(
            list_dir("/", &mut |name, _ino, _t| names.push(name.to_string())),
            0
        );
        assert!(names.contains(&"test.txt".to_string()));
        assert!(names.contains(&"sub".to_string()));
    }

    #[test]
    fn fd_allocation_is_lowest_free_and_bounded() {
        let _g = test_guard();
        setup(hello_image());

        let fd = open("/test.txt", O_RDONLY);
        assert_eq!(fd, 3);
        let fd2 = open("/test.txt", O_RDONLY);
        assert_eq!(fd2, 4);
        close(fd as usize);
        // the freed slot is the smallest again.
        assert_eq!(open("/test.txt", O_RDONLY), 3);
        close(3);
        close(fd2 as usize);

        let mut opened = Vec::new();
        loop {
            let fd = open("/test.txt", O_RDONLY);
            if fd < 0 {
                break;
            }
            opened.push(fd as usize);
        }
        assert_eq!(get_errno(), Errno::MFile as i32);
        assert_eq!(opened.len(), NFILE - FD_RESERVED);
        for fd in opened {
            close(fd);
        }
    }
}
