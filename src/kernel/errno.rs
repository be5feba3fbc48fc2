// Kernel error reporting.
//
// Every failure in the kernel is described by a flat numeric kind,
// partitioned by subsystem:
//
//   0        success
//   1..=29   generic POSIX-like errors
//   30..=49  filesystem
//   50..=69  ELF loader
//   70..=89  virtio
//   90..=109 process
//   110..=129 memory
//
// Internally, fallible operations return Result<T, Errno> and propagate
// with `?`. At the public VFS and syscall surfaces the kind is recorded
// in the process-wide `errno` slot and a sentinel (-1, 0, ...) is
// returned, so diagnostics can always name the most recent failure.
// Layers in between must not overwrite a kind set below them unless
// they have a more specific diagnosis.

use core::sync::atomic::{AtomicI32, Ordering};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    // generic
    Perm = 1,
    NoEnt = 2,
    Io = 5,
    BadF = 9,
    NoMem = 12,
    Acces = 13,
    Exist = 17,
    NotDir = 20,
    IsDir = 21,
    Inval = 22,
    NFile = 23,
    MFile = 24,
    NotSup = 25,
    RoFs = 26,
    NameTooLong = 27,
    // filesystem
    FsCorrupt = 30,
    FsBadSuper = 31,
    FsBadIno = 32,
    // ELF loader
    ElfMagic = 50,
    ElfClass = 51,
    // virtio
    VirtioMagic = 70,
    VirtioVersion = 71,
    VirtioDevice = 72,
    VirtioFeatures = 73,
    VirtioQueue = 74,
    VirtioTimeout = 75,
    // process
    ProcInit = 90,
    ProcLimit = 91,
    // memory
    MemNoMem = 110,
    MemAlign = 111,
}

impl Errno {
    pub fn as_str(self) -> &'static str {
        match self {
            Errno::Perm => "Operation not permitted",
            Errno::NoEnt => "No such file or directory",
            Errno::Io => "Input/output error",
            Errno::BadF => "Bad file descriptor",
            Errno::NoMem => "Out of memory",
            Errno::Acces => "Permission denied",
            Errno::Exist => "File exists",
            Errno::NotDir => "Not a directory",
            Errno::IsDir => "Is a directory",
            Errno::Inval => "Invalid argument",
            Errno::NFile => "Too many open files in system",
            Errno::MFile => "Too many open files",
            Errno::NotSup => "Operation not supported",
            Errno::RoFs => "Read-only file system",
            Errno::NameTooLong => "File name too long",
            Errno::FsCorrupt => "Filesystem corrupted",
            Errno::FsBadSuper => "Bad superblock",
            Errno::FsBadIno => "Bad inode number",
            Errno::ElfMagic => "Bad ELF magic",
            Errno::ElfClass => "Unsupported ELF class",
            Errno::VirtioMagic => "Not a virtio device",
            Errno::VirtioVersion => "Unsupported virtio version",
            Errno::VirtioDevice => "Wrong virtio device type",
            Errno::VirtioFeatures => "Virtio feature negotiation failed",
            Errno::VirtioQueue => "Virtio queue setup failed",
            Errno::VirtioTimeout => "Virtio request timed out",
            Errno::ProcInit => "Process initialization failed",
            Errno::ProcLimit => "Process limit reached",
            Errno::MemNoMem => "Physical memory exhausted",
            Errno::MemAlign => "Bad alignment",
        }
    }

    pub fn from_code(code: i32) -> Option<Errno> {
        Some(match code {
            1 => Errno::Perm,
            2 => Errno::NoEnt,
            5 => Errno::Io,
            9 => Errno::BadF,
            12 => Errno::NoMem,
            13 => Errno::Acces,
            17 => Errno::Exist,
            20 => Errno::NotDir,
            21 => Errno::IsDir,
            22 => Errno::Inval,
            23 => Errno::NFile,
            24 => Errno::MFile,
            25 => Errno::NotSup,
            26 => Errno::RoFs,
            27 => Errno::NameTooLong,
            30 => Errno::FsCorrupt,
            31 => Errno::FsBadSuper,
            32 => Errno::FsBadIno,
            50 => Errno::ElfMagic,
            51 => Errno::ElfClass,
            70 => Errno::VirtioMagic,
            71 => Errno::VirtioVersion,
            72 => Errno::VirtioDevice,
            73 => Errno::VirtioFeatures,
            74 => Errno::VirtioQueue,
            75 => Errno::VirtioTimeout,
            90 => Errno::ProcInit,
            91 => Errno::ProcLimit,
            110 => Errno::MemNoMem,
            111 => Errno::MemAlign,
            _ => return None,
        })
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// The last error reported by a public kernel operation. The kernel is
// one process wide for now; a multi-process successor moves this into
// the process control block.
static ERRNO: AtomicI32 = AtomicI32::new(0);

pub fn set_errno(e: Errno) {
    ERRNO.store(e as i32, Ordering::Relaxed);
}

pub fn get_errno() -> i32 {
    ERRNO.load(Ordering::Relaxed)
}

pub fn clear_errno() {
    ERRNO.store(0, Ordering::Relaxed);
}

// map any kind, defined or not, to a stable human-readable string.
pub fn strerror(code: i32) -> &'static str {
    if code == 0 {
        return "Success";
    }
    match Errno::from_code(code) {
        Some(e) => e.as_str(),
        None => "Unknown error",
    }
}

// print "{prefix}: {message}" for the current errno on the console.
// does not modify errno.
pub fn perror(prefix: &str) {
    crate::println!("{}: {}", prefix, strerror(get_errno()));
}

#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let _g = test_guard();
        clear_errno();
        assert_eq!(get_errno(), 0);
        set_errno(Errno::Inval);
        assert_eq!(get_errno(), Errno::Inval as i32);
        clear_errno();
        assert_eq!(get_errno(), 0);
    }

    #[test]
    fn strings_are_stable() {
        assert_eq!(strerror(0), "Success");
        assert_eq!(strerror(Errno::NoEnt as i32), "No such file or directory");
        assert_eq!(strerror(Errno::BadF as i32), "Bad file descriptor");
        assert_eq!(strerror(Errno::FsBadSuper as i32), "Bad superblock");
        assert_eq!(strerror(Errno::VirtioTimeout as i32), "Virtio request timed out");
        // unknown kinds fall back instead of panicking.
        assert_eq!(strerror(9999), "Unknown error");
        assert_eq!(strerror(-3), "Unknown error");
    }

    #[test]
    fn kinds_sit_in_their_ranges() {
        for e in [Errno::Perm, Errno::Inval, Errno::RoFs] {
            assert!((1..=29).contains(&(e as i32)));
        }
        for e in [Errno::FsCorrupt, Errno::FsBadSuper, Errno::FsBadIno] {
            assert!((30..=49).contains(&(e as i32)));
        }
        for e in [Errno::ElfMagic, Errno::ElfClass] {
            assert!((50..=69).contains(&(e as i32)));
        }
        for e in [Errno::VirtioMagic, Errno::VirtioTimeout] {
            assert!((70..=89).contains(&(e as i32)));
        }
        for e in [Errno::ProcInit, Errno::ProcLimit] {
            assert!((90..=109).contains(&(e as i32)));
        }
        for e in [Errno::MemNoMem, Errno::MemAlign] {
            assert!((110..=129).contains(&(e as i32)));
        }
    }

    #[test]
    fn from_code_round_trips() {
        for code in 0..=130 {
            if let Some(e) = Errno::from_code(code) {
                assert_eq!(e as i32, code);
            }
        }
        assert_eq!(Errno::from_code(0), None);
        assert_eq!(Errno::from_code(3), None);
    }

    #[test]
    fn perror_leaves_errno_alone() {
        let _g = test_guard();
        set_errno(Errno::NoEnt);
        perror("test_prefix");
        assert_eq!(get_errno(), Errno::NoEnt as i32);
        clear_errno();
    }

    #[test]
    fn propagation_preserves_the_deepest_kind() {
        fn level3(fail: bool) -> Result<(), Errno> {
            if fail {
                return Err(Errno::Io);
            }
            Ok(())
        }
        fn level2(fail: bool) -> Result<(), Errno> {
            level3(fail)
        }
        fn level1(fail: bool) -> Result<(), Errno> {
            level2(fail)
        }

        let _g = test_guard();
        clear_errno();
        match level1(true) {
            Ok(()) => panic!("expected failure"),
            Err(e) => set_errno(e),
        }
        assert_eq!(get_errno(), Errno::Io as i32);
        assert!(level1(false).is_ok());
        clear_errno();
        assert_eq!(get_errno(), 0);
    }
}
