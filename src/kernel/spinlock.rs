use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

// Mutual exclusion spin lock.
//
// The kernel runs a single hart, so the only competitor for a lock is
// an interrupt handler; holding a lock therefore disables device
// interrupts (push_off/pop_off), and the handlers themselves only take
// locks that the interrupted code has already released.
#[derive(Debug)]
pub struct Mutex<T> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

// Safety: the UnsafeCell is only reachable through a held guard or an
// exclusive reference, so Mutex<T> is Sync whenever T is Send.
unsafe impl<T> Sync for Mutex<T> where T: Send {}

pub struct MutexGuard<'a, T: 'a> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        push_off();
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop()
        }
        MutexGuard { mutex: self }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // Mutable access without locking; requires exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<'a, T: 'a> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        pop_off();
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

// push_off/pop_off are like intr_off()/intr_on() except that they are
// matched: it takes two pop_off()s to undo two push_off()s. If
// interrupts are initially off, then push_off, pop_off leaves them off.
#[cfg(target_os = "none")]
mod intr {
    use crate::riscv::{intr_get, intr_off, intr_on};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // depth of push_off() nesting and the interrupt state before the
    // outermost one; single hart, so plain statics suffice.
    static NOFF: AtomicUsize = AtomicUsize::new(0);
    static INTENA: AtomicBool = AtomicBool::new(false);

    pub fn push_off() {
        let old = intr_get();
        intr_off();
        if NOFF.load(Ordering::Relaxed) == 0 {
            INTENA.store(old, Ordering::Relaxed);
        }
        NOFF.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop_off() {
        assert!(!intr_get(), "pop_off - interruptible");
        let n = NOFF.fetch_sub(1, Ordering::Relaxed);
        assert!(n >= 1, "pop_off");
        if n == 1 && INTENA.load(Ordering::Relaxed) {
            intr_on();
        }
    }
}

#[cfg(not(target_os = "none"))]
mod intr {
    pub fn push_off() {}
    pub fn pop_off() {}
}

pub use intr::{pop_off, push_off};
