//! Hash-bucketed futex wait queues (§4.5). Each bucket is a pure
//! test-and-set spinlock guarding an intrusive-ish wait list; locks are
//! held only for bounded, non-blocking list manipulation.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::host::wait::InterruptibleWait;

/// One blocked waiter: the address it's waiting on and the per-thread wake
/// event to signal.
pub struct WaitBlock {
    pub addr: usize,
    pub wake: Arc<dyn InterruptibleWait>,
}

/// A minimal test-and-set spinlock, matching the discipline described for
/// futex buckets: short critical sections only, backoff via
/// `std::hint::spin_loop`.
pub struct Spinlock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub fn new(value: T) -> Self {
        Spinlock { locked: AtomicBool::new(false), value: UnsafeCell::new(value) }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }
}

impl<T> std::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> std::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

pub struct FutexBucket {
    waiters: Spinlock<VecDeque<WaitBlock>>,
}

impl Default for FutexBucket {
    fn default() -> Self {
        FutexBucket { waiters: Spinlock::new(VecDeque::new()) }
    }
}

impl FutexBucket {
    pub fn push(&self, block: WaitBlock) {
        self.waiters.lock().push_back(block);
    }

    /// Removes (and returns whether present) the first queued block at
    /// `addr` whose wake event pointer equals `wake`, used by WAIT to
    /// self-remove after a timeout/interruption race.
    pub fn remove_if_present(&self, addr: usize, wake: &Arc<dyn InterruptibleWait>) -> bool {
        let mut guard = self.waiters.lock();
        if let Some(pos) = guard.iter().position(|b| b.addr == addr && Arc::ptr_eq(&b.wake, wake)) {
            guard.remove(pos);
            true
        } else {
            false
        }
    }

    /// Wakes up to `n` waiters at `addr`, returning the count woken. Locks
    /// and unlocks internally; callers needing to hold the lock across a
    /// WAKE and a REQUEUE use [`FutexBucket::lock`] directly instead.
    pub fn wake(&self, addr: usize, n: u32) -> u32 {
        wake_matching(&mut self.waiters.lock(), addr, n)
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Locks the bucket's wait list directly. Used by REQUEUE/CMP_REQUEUE,
    /// which must hold both source and destination locks across the whole
    /// operation.
    pub fn lock(&self) -> SpinlockGuard<'_, VecDeque<WaitBlock>> {
        self.waiters.lock()
    }
}

/// Wakes up to `n` blocks matching `addr` in an already-locked wait list.
pub fn wake_matching(list: &mut VecDeque<WaitBlock>, addr: usize, n: u32) -> u32 {
    let mut woken = 0u32;
    let mut i = 0;
    while i < list.len() && woken < n {
        if list[i].addr == addr {
            let block = list.remove(i).unwrap();
            block.wake.signal();
            woken += 1;
        } else {
            i += 1;
        }
    }
    woken
}

/// Hashes a futex address to a bucket index in `[0, bucket_count)`.
// TODO: improve this silly hash function.
pub fn bucket_index(addr: usize, bucket_count: usize) -> usize {
    addr % bucket_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::wait::CondvarEvent;

    fn block(addr: usize) -> (WaitBlock, Arc<CondvarEvent>) {
        let event: Arc<CondvarEvent> = Arc::new(CondvarEvent::new());
        let wake: Arc<dyn InterruptibleWait> = event.clone();
        (WaitBlock { addr, wake }, event)
    }

    #[test]
    fn wake_signals_only_matching_addr_up_to_n() {
        let bucket = FutexBucket::default();
        let (b1, e1) = block(100);
        let (b2, e2) = block(100);
        let (b3, e3) = block(200);
        bucket.push(b1);
        bucket.push(b2);
        bucket.push(b3);
        let woken = bucket.wake(100, 1);
        assert_eq!(woken, 1);
        assert_eq!(bucket.len(), 2);
        let _ = (e1, e2, e3);
    }

    #[test]
    fn bucket_index_is_stable_for_the_same_address() {
        assert_eq!(bucket_index(0x1000, 256), bucket_index(0x1000, 256));
    }
}
