//! Futex syscall entry points (§4.5), following the same
//! `impl Futex { pub fn do_xxx(...) -> Result<usize, Errno> }` shape the
//! socket syscalls use.

use std::sync::Arc;
use std::time::Duration;

use linux_errno::Errno;

use super::bucket::{bucket_index, wake_matching, FutexBucket, WaitBlock};
use crate::host::memory::MemoryAccess;
use crate::host::wait::{InterruptibleWait, WaitOutcome};

pub struct Futex {
    buckets: Vec<FutexBucket>,
}

impl Futex {
    pub fn new(bucket_count: usize) -> Self {
        let buckets = (0..bucket_count.max(1)).map(|_| FutexBucket::default()).collect();
        Futex { buckets }
    }

    fn index(&self, addr: usize) -> usize {
        bucket_index(addr, self.buckets.len())
    }

    fn bucket(&self, addr: usize) -> &FutexBucket {
        &self.buckets[self.index(addr)]
    }

    unsafe fn read_i32(memory: &dyn MemoryAccess, addr: usize) -> Result<i32, Errno> {
        if !memory.check_read(addr, 4) {
            return Err(Errno::EFAULT);
        }
        Ok(std::ptr::read(addr as *const i32))
    }

    /// WAIT(addr, expected, timeout). Linux returns `-EAGAIN` on a value
    /// mismatch; this implementation follows the source it's grounded on
    /// and returns `0` instead (recorded as an intentional deviation).
    pub fn do_wait(
        &self,
        memory: &dyn MemoryAccess,
        addr: usize,
        expected: i32,
        timeout: Option<Duration>,
        wake: Arc<dyn InterruptibleWait>,
    ) -> Result<usize, Errno> {
        let bucket = self.bucket(addr);

        // The value check and the enqueue must happen under the same
        // bucket lock: checking first and enqueueing separately would let
        // a WAKE land in the gap between the two and be missed entirely.
        {
            let mut list = bucket.lock();
            let current = unsafe { Self::read_i32(memory, addr)? };
            if current != expected {
                return Ok(0);
            }
            list.push_back(WaitBlock { addr, wake: wake.clone() });
        }

        match wake.wait(timeout) {
            WaitOutcome::Woken => Ok(0),
            WaitOutcome::Interrupted => {
                bucket.remove_if_present(addr, &wake);
                Err(Errno::EINTR)
            }
            WaitOutcome::TimedOut => {
                bucket.remove_if_present(addr, &wake);
                Err(Errno::ETIMEDOUT)
            }
        }
    }

    /// WAKE(addr, n). Returns the number of waiters woken.
    pub fn do_wake(&self, addr: usize, n: u32) -> usize {
        self.bucket(addr).wake(addr, n) as usize
    }

    /// REQUEUE(addr, n, addr2). Wakes up to `n` waiters at `addr`, then
    /// moves all remaining matching waiters to `addr2`.
    pub fn do_requeue(&self, addr: usize, n: u32, addr2: usize) -> usize {
        self.requeue_inner(addr, n, addr2, u32::MAX, None)
            .expect("REQUEUE without a comparison cannot fail")
    }

    /// CMP_REQUEUE(addr, n, addr2, expected). Same as REQUEUE, but first
    /// verifies `*addr == expected` while holding both bucket locks;
    /// on mismatch, returns `EAGAIN` without waking anything.
    pub fn do_cmp_requeue(
        &self,
        memory: &dyn MemoryAccess,
        addr: usize,
        n: u32,
        addr2: usize,
        expected: i32,
    ) -> Result<usize, Errno> {
        self.requeue_inner(addr, n, addr2, u32::MAX, Some((memory, expected)))
    }

    fn requeue_inner(
        &self,
        addr: usize,
        n: u32,
        addr2: usize,
        requeue_limit: u32,
        compare: Option<(&dyn MemoryAccess, i32)>,
    ) -> Result<usize, Errno> {
        let idx1 = self.index(addr);
        let idx2 = self.index(addr2);

        // Address-ordered lock acquisition: always lock the lower bucket
        // index first so two concurrent requeues between the same pair of
        // buckets can never deadlock on each other.
        if idx1 == idx2 {
            let mut list = self.buckets[idx1].lock();
            if let Some((memory, expected)) = compare {
                let current = unsafe { Self::read_i32(memory, addr)? };
                if current != expected {
                    return Err(Errno::EAGAIN);
                }
            }
            let woken = wake_matching(&mut list, addr, n);
            let remaining: Vec<WaitBlock> = {
                let mut moved = Vec::new();
                let mut i = 0;
                while i < list.len() && (moved.len() as u32) < requeue_limit {
                    if list[i].addr == addr {
                        let mut block = list.remove(i).unwrap();
                        block.addr = addr2;
                        moved.push(block);
                    } else {
                        i += 1;
                    }
                }
                moved
            };
            list.extend(remaining);
            return Ok(woken as usize);
        }

        let (first, second) = if idx1 < idx2 { (idx1, idx2) } else { (idx2, idx1) };
        let mut lock_first = self.buckets[first].lock();
        let mut lock_second = self.buckets[second].lock();

        if let Some((memory, expected)) = compare {
            let current = unsafe { Self::read_i32(memory, addr)? };
            if current != expected {
                return Err(Errno::EAGAIN);
            }
        }

        let (src, dest) = if idx1 == first {
            (&mut lock_first, &mut lock_second)
        } else {
            (&mut lock_second, &mut lock_first)
        };

        let woken = wake_matching(src, addr, n);
        let mut moved = Vec::new();
        let mut i = 0;
        while i < src.len() && (moved.len() as u32) < requeue_limit {
            if src[i].addr == addr {
                let mut block = src.remove(i).unwrap();
                block.addr = addr2;
                moved.push(block);
            } else {
                i += 1;
            }
        }
        dest.extend(moved);
        Ok(woken as usize)
    }

    /// `set_robust_list(head, len)`: a no-op stub (§4.6). Logs a warning on
    /// an unexpected length and always succeeds.
    pub fn do_set_robust_list(len: usize, expected_len: usize) -> Result<usize, Errno> {
        if len != expected_len {
            log::warn!("set_robust_list: unexpected robust_list_head size {len}, expected {expected_len}");
        }
        Ok(0)
    }

    #[cfg(test)]
    fn waiting_count(&self, addr: usize) -> usize {
        self.bucket(addr).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::PermissiveMemory;
    use crate::host::wait::CondvarEvent;

    fn wake_event() -> Arc<CondvarEvent> {
        Arc::new(CondvarEvent::new())
    }

    #[test]
    fn wait_on_mismatched_value_returns_zero_not_eagain() {
        let futex = Futex::new(4);
        let memory = PermissiveMemory;
        let mut value: i32 = 5;
        let addr = &mut value as *mut i32 as usize;
        let wake = wake_event();
        let result = futex.do_wait(&memory, addr, 99, Some(Duration::from_millis(5)), wake);
        assert_eq!(result, Ok(0));
    }

    #[test]
    fn wake_unblocks_a_waiting_thread() {
        let futex = Arc::new(Futex::new(4));
        let memory = PermissiveMemory;
        let value = Arc::new(std::sync::atomic::AtomicI32::new(7));
        let addr = value.as_ptr() as usize;
        let wake = wake_event();

        let futex2 = futex.clone();
        let handle = std::thread::spawn(move || {
            let memory = PermissiveMemory;
            futex2.do_wait(&memory, addr, 7, None, wake)
        });

        // Give the waiter time to register before waking it.
        std::thread::sleep(Duration::from_millis(20));
        let woken = futex.do_wake(addr, 1);
        assert_eq!(woken, 1);
        assert_eq!(handle.join().unwrap(), Ok(0));
    }

    #[test]
    fn wait_times_out_when_never_woken() {
        let futex = Futex::new(4);
        let memory = PermissiveMemory;
        let value: i32 = 1;
        let addr = &value as *const i32 as usize;
        let wake = wake_event();
        let result = futex.do_wait(&memory, addr, 1, Some(Duration::from_millis(10)), wake);
        assert_eq!(result, Err(Errno::ETIMEDOUT));
    }

    #[test]
    fn unreadable_address_is_efault() {
        struct NoRead;
        impl MemoryAccess for NoRead {
            fn check_read(&self, _: usize, _: usize) -> bool {
                false
            }
            fn check_write(&self, _: usize, _: usize) -> bool {
                true
            }
        }
        let futex = Futex::new(4);
        let wake = wake_event();
        let result = futex.do_wait(&NoRead, 0x1000, 0, None, wake);
        assert_eq!(result, Err(Errno::EFAULT));
    }

    #[test]
    fn cmp_requeue_fails_on_mismatch_without_waking_anyone() {
        let futex = Futex::new(4);
        let memory = PermissiveMemory;
        let value: i32 = 10;
        let addr = &value as *const i32 as usize;
        let result = futex.do_cmp_requeue(&memory, addr, 1, addr + 4096, 999);
        assert_eq!(result, Err(Errno::EAGAIN));
    }

    #[test]
    fn requeue_moves_waiters_beyond_the_woken_count() {
        let futex = Arc::new(Futex::new(1)); // force both addresses into the same bucket
        let addr_a = Box::into_raw(Box::new(1i32)) as usize;
        let addr_b = addr_a + 4096;

        let f1 = futex.clone();
        let h1 = std::thread::spawn(move || {
            let memory = PermissiveMemory;
            f1.do_wait(&memory, addr_a, 1, Some(Duration::from_secs(5)), wake_event())
        });
        let f2 = futex.clone();
        let h2 = std::thread::spawn(move || {
            let memory = PermissiveMemory;
            f2.do_wait(&memory, addr_a, 1, Some(Duration::from_secs(5)), wake_event())
        });

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(futex.waiting_count(addr_a), 2);

        let woken = futex.do_requeue(addr_a, 1, addr_b);
        assert_eq!(woken, 1);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(futex.waiting_count(addr_a), 0);
        assert_eq!(futex.waiting_count(addr_b), 1);

        futex.do_wake(addr_b, 1);
        assert_eq!(h1.join().unwrap(), Ok(0));
        assert_eq!(h2.join().unwrap(), Ok(0));
        unsafe { drop(Box::from_raw(addr_a as *mut i32)) };
    }
}
