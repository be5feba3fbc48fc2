#[cfg(target_os = "none")]
mod imp {
    use crate::console;
    use crate::spinlock::Mutex;
    use core::fmt;
    use core::panic;
    use core::sync::atomic::{AtomicBool, Ordering};

    pub static PR: Pr = Pr {
        writer: Mutex::new(Writer, "pr"),
        panicked: AtomicBool::new(false),
    };

    // lock to avoid interleaving concurrent println!'s.
    // the panicked flag lets panic! bypass the lock so a panic inside
    // a held print lock still reaches the console.
    pub struct Pr {
        writer: Mutex<Writer>,
        panicked: AtomicBool,
    }

    pub struct Writer;

    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                console::putc(byte);
            }
            Ok(())
        }
    }

    pub fn _print(args: fmt::Arguments<'_>) {
        use fmt::Write;

        if !PR.panicked.load(Ordering::Relaxed) {
            PR.writer.lock().write_fmt(args).expect("_print: error");
        } else {
            // for panic!
            let mut writer = Writer;
            writer.write_fmt(args).expect("_print: error");
        }
    }

    #[panic_handler]
    fn panic(info: &panic::PanicInfo<'_>) -> ! {
        PR.panicked.store(true, Ordering::Relaxed);
        crate::println!("{}", info);
        loop {}
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use core::fmt;

    // host builds route kernel prints to the test harness's stdout.
    #[cfg(test)]
    pub fn _print(args: fmt::Arguments<'_>) {
        std::print!("{}", args);
    }

    #[cfg(not(test))]
    pub fn _print(_args: fmt::Arguments<'_>) {}
}

pub use imp::_print;

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($fmt:expr) => {
        $crate::print!(concat!($fmt, "\n"))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}
