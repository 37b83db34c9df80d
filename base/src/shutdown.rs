use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

/// Broadcasts an orderly-shutdown request to every worker thread.
///
/// Listener threads blocked in `accept`, the DMA reader blocked on a
/// condvar, and the persistence thread's poll sleep all need to observe the
/// same signal without taking a lock on the hot path, so the flag is a
/// plain atomic; the condvar exists only to let sleeping threads wake
/// immediately instead of waiting out their poll interval.
#[derive(Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
    gate: Arc<(Mutex<()>, Condvar)>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        ShutdownFlag {
            flag: Arc::new(AtomicBool::new(false)),
            gate: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let (_lock, cvar) = &*self.gate;
        cvar.notify_all();
    }

    /// Sleep up to `timeout`, waking early if `signal` is called.
    /// Returns `true` if shutdown was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let (lock, cvar) = &*self.gate;
        let guard = lock.lock().unwrap();
        let (_guard, _result) = cvar.wait_timeout(guard, timeout).unwrap();
        self.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_wakes_waiter() {
        let flag = ShutdownFlag::new();
        let waiter = flag.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        flag.signal();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_timeout_expires_without_signal() {
        let flag = ShutdownFlag::new();
        let woke = flag.wait_timeout(Duration::from_millis(10));
        assert!(!woke);
    }
}
