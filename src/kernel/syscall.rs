// System call numbers and the thin map onto VFS operations.
//
// The trap dispatcher hands over the syscall number from a7 and the
// raw arguments from a0..a5. Success returns the operation's value;
// failure returns -errno. There is no user address space yet, so
// pointer arguments are kernel addresses supplied by the caller.

use crate::errno::{get_errno, set_errno, Errno};
use crate::param::MAXPATH;
use crate::stat::Stat;
use crate::vfs;
use alloc::string::String;

#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SysCalls {
    Exit = 0,
    Write = 1,
    Read = 2,
    Open = 13,
    Close = 14,
    Lseek = 15,
    Stat = 16,
    Mkdir = 17,
}

impl SysCalls {
    pub fn from_usize(n: usize) -> Option<SysCalls> {
        Some(match n {
            0 => SysCalls::Exit,
            1 => SysCalls::Write,
            2 => SysCalls::Read,
            13 => SysCalls::Open,
            14 => SysCalls::Close,
            15 => SysCalls::Lseek,
            16 => SysCalls::Stat,
            17 => SysCalls::Mkdir,
            _ => return None,
        })
    }
}

// copy out a nul-terminated path, bounded by MAXPATH.
unsafe fn arg_str<'a>(ptr: usize, max: usize) -> Result<&'a str, Errno> {
    if ptr == 0 {
        return Err(Errno::Inval);
    }
    let base = ptr as *const u8;
    let mut len = 0;
    while len < max && *base.add(len) != 0 {
        len += 1;
    }
    if len == max {
        return Err(Errno::NameTooLong);
    }
    core::str::from_utf8(core::slice::from_raw_parts(base, len)).map_err(|_| Errno::Inval)
}

// VFS calls return -1 with errno set; the syscall ABI folds the kind
// into the return value.
fn vfs_ret(r: isize) -> isize {
    if r < 0 {
        -(get_errno() as isize)
    } else {
        r
    }
}

fn fail(e: Errno) -> isize {
    set_errno(e);
    -(e as isize)
}

fn sys_write(fd: usize, ptr: usize, len: usize) -> isize {
    if ptr == 0 {
        return fail(Errno::Inval);
    }
    let buf = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    // fds 1 and 2 are the console, which is not a VFS node.
    if fd == 1 || fd == 2 {
        crate::print!("{}", String::from_utf8_lossy(buf));
        return len as isize;
    }
    vfs_ret(vfs::write(fd, buf))
}

fn sys_read(fd: usize, ptr: usize, len: usize) -> isize {
    if ptr == 0 {
        return fail(Errno::Inval);
    }
    let buf = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) };
    vfs_ret(vfs::read(fd, buf))
}

fn sys_open(path_ptr: usize, flags: usize) -> isize {
    let path = match unsafe { arg_str(path_ptr, MAXPATH) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    vfs_ret(vfs::open(path, flags as u32))
}

fn sys_stat(path_ptr: usize, st_ptr: usize) -> isize {
    let path = match unsafe { arg_str(path_ptr, MAXPATH) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    if st_ptr == 0 {
        return fail(Errno::Inval);
    }
    let mut st = Stat::default();
    let r = vfs_ret(vfs::stat(path, &mut st));
    if r == 0 {
        unsafe { core::ptr::write(st_ptr as *mut Stat, st) };
    }
    r
}

fn sys_mkdir(path_ptr: usize, mode: usize) -> isize {
    let path = match unsafe { arg_str(path_ptr, MAXPATH) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    vfs_ret(vfs::mkdir(path, mode as u16))
}

fn sys_exit(code: usize) -> isize {
    #[cfg(target_os = "none")]
    {
        crate::println!("exit({})", code as isize);
        crate::sbi::shutdown()
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = code;
        0
    }
}

// entry point: number from a7, arguments from a0..a5.
pub fn dispatch(num: usize, args: [usize; 6]) -> isize {
    match SysCalls::from_usize(num) {
        Some(SysCalls::Exit) => sys_exit(args[0]),
        Some(SysCalls::Write) => sys_write(args[0], args[1], args[2]),
        Some(SysCalls::Read) => sys_read(args[0], args[1], args[2]),
        Some(SysCalls::Open) => sys_open(args[0], args[1]),
        Some(SysCalls::Close) => vfs_ret(vfs::close(args[0])),
        Some(SysCalls::Lseek) => vfs_ret(vfs::seek(args[0], args[1] as i32, args[2] as u32)),
        Some(SysCalls::Stat) => sys_stat(args[0], args[1]),
        Some(SysCalls::Mkdir) => sys_mkdir(args[0], args[1]),
        None => {
            crate::println!("unknown sys call {}", num);
            fail(Errno::Inval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::test_guard;
    use crate::ext2::Ext2Fs;
    use crate::fcntl::{O_RDONLY, SEEK_SET};
    use crate::mkfs::ImageBuilder;
    use crate::stat::VType;
    use alloc::sync::Arc;

    fn setup() {
        vfs::init();
        let disk = Arc::new(
            ImageBuilder::new(1024)
                .file("test.txt", b"Hello, world!\n")
                .build(),
        );
        vfs::mount_root(Ext2Fs::mount(disk).unwrap()).unwrap();
    }

    fn a(list: &[usize]) -> [usize; 6] {
        let mut args = [0usize; 6];
        args[..list.len()].copy_from_slice(list);
        args
    }

    #[test]
    fn numbers_match_the_abi() {
        assert_eq!(SysCalls::Exit as usize, 0);
        assert_eq!(SysCalls::Write as usize, 1);
        assert_eq!(SysCalls::Read as usize, 2);
        assert_eq!(SysCalls::Open as usize, 13);
        assert_eq!(SysCalls::Close as usize, 14);
        assert_eq!(SysCalls::from_usize(13), Some(SysCalls::Open));
        assert_eq!(SysCalls::from_usize(99), None);
    }

    #[test]
    fn open_read_close_through_the_abi() {
        let _g = test_guard();
        setup();

        let path = b"/test.txt\0";
        let fd = dispatch(SysCalls::Open as usize, a(&[path.as_ptr() as usize, O_RDONLY as usize]));
        assert!(fd >= 3);

        let mut buf = [0u8; 14];
        let n = dispatch(
            SysCalls::Read as usize,
            a(&[fd as usize, buf.as_mut_ptr() as usize, buf.len()]),
        );
        assert_eq!(n, 14);
        assert_eq!(&buf, b"Hello, world!\n");

        let pos = dispatch(
            SysCalls::Lseek as usize,
            a(&[fd as usize, 0, SEEK_SET as usize]),
        );
        assert_eq!(pos, 0);

        assert_eq!(dispatch(SysCalls::Close as usize, a(&[fd as usize])), 0);
    }

    #[test]
    fn failures_return_minus_errno() {
        let _g = test_guard();
        setup();

        let mut buf = [0u8; 8];
        let r = dispatch(
            SysCalls::Read as usize,
            a(&[999, buf.as_mut_ptr() as usize, buf.len()]),
        );
        assert_eq!(r, -(Errno::BadF as isize));

        let path = b"/nope\0";
        let r = dispatch(
            SysCalls::Open as usize,
            a(&[path.as_ptr() as usize, O_RDONLY as usize]),
        );
        assert_eq!(r, -(Errno::NoEnt as isize));

        let r = dispatch(77, a(&[]));
        assert_eq!(r, -(Errno::Inval as isize));
    }

    #[test]
    fn stat_copies_out() {
        let _g = test_guard();
        setup();

        let path = b"/test.txt\0";
        let mut st = Stat::default();
        let r = dispatch(
            SysCalls::Stat as usize,
            a(&[path.as_ptr() as usize, &mut st as *mut Stat as usize]),
        );
        assert_eq!(r, 0);
        assert_eq!(st.size, 14);
        assert_eq!(st.vtype, VType::File);
    }

    #[test]
    fn mkdir_reports_the_stubbed_filesystem() {
        let _g = test_guard();
        setup();
        let path = b"/newdir\0";
        let r = dispatch(
            SysCalls::Mkdir as usize,
            a(&[path.as_ptr() as usize, 0o755]),
        );
        assert_eq!(r, -(Errno::NotSup as isize));
    }

    #[test]
    fn console_write_bypasses_the_fd_table() {
        let _g = test_guard();
        setup();
        let msg = b"hello from the console\n";
        let r = dispatch(
            SysCalls::Write as usize,
            a(&[1, msg.as_ptr() as usize, msg.len()]),
        );
        assert_eq!(r, msg.len() as isize);
    }

    #[test]
    fn bad_pointers_are_rejected() {
        let _g = test_guard();
        setup();
        assert_eq!(
            dispatch(SysCalls::Open as usize, a(&[0, 0])),
            -(Errno::Inval as isize)
        );
        // an unterminated path is refused rather than over-read.
        let long = [b'a'; MAXPATH + 8];
        assert_eq!(
            dispatch(SysCalls::Open as usize, a(&[long.as_ptr() as usize, 0])),
            -(Errno::NameTooLong as isize)
        );
    }
}
