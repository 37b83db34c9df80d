//! A `std::sync::Mutex` wrapper that never hands back a poison error.
//!
//! The server has no use for poison recovery: if a thread panics while
//! holding a lock the whole process is already in an unknown state, and
//! orderly shutdown calls for an abort, not a limp-along. Every call site
//! in this workspace wants the guard, not a `Result`, so we unwrap the
//! poison here once instead of at every lock site.

use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard as StdMutexGuard;

pub struct Mutex<T: ?Sized> {
    inner: StdMutex<T>,
}

pub type MutexGuard<'a, T> = StdMutexGuard<'a, T>;

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            inner: StdMutex::new(value),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_read_write() {
        let m = Mutex::new(5);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 6);
    }
}
