//! Interruptible, timed waiting on a host event or per-thread wake event
//! (§4.7).

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Woken,
    Interrupted,
    TimedOut,
}

pub trait InterruptibleWait: Send + Sync {
    /// Blocks until signalled, interrupted, or `timeout` elapses (blocks
    /// forever on `None`).
    fn wait(&self, timeout: Option<Duration>) -> WaitOutcome;

    /// Wakes exactly one blocked waiter, as a host event or futex wake
    /// event would.
    fn signal(&self);

    /// Delivers an interruption (signal delivery in the guest sense) to a
    /// blocked waiter.
    fn interrupt(&self);
}

/// A condvar-backed event: signalled/unsignalled state plus a separate
/// interrupted flag, so tests can drive timeout, wake, and interruption
/// deterministically without a real OS-level event object.
#[derive(Debug)]
pub struct CondvarEvent {
    state: Mutex<State>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct State {
    signalled: bool,
    interrupted: bool,
}

impl Default for CondvarEvent {
    fn default() -> Self {
        CondvarEvent { state: Mutex::new(State::default()), condvar: Condvar::new() }
    }
}

impl CondvarEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterruptibleWait for CondvarEvent {
    fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.interrupted {
                guard.interrupted = false;
                return WaitOutcome::Interrupted;
            }
            if guard.signalled {
                guard.signalled = false;
                return WaitOutcome::Woken;
            }
            match timeout {
                None => guard = self.condvar.wait(guard).unwrap(),
                Some(d) => {
                    let (next, result) = self.condvar.wait_timeout(guard, d).unwrap();
                    guard = next;
                    if result.timed_out() && !guard.signalled && !guard.interrupted {
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
    }

    fn signal(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.signalled = true;
        self.condvar.notify_one();
    }

    fn interrupt(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.interrupted = true;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_wakes_a_blocked_waiter() {
        let event = Arc::new(CondvarEvent::new());
        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        event.signal();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Woken);
    }

    #[test]
    fn times_out_when_never_signalled() {
        let event = CondvarEvent::new();
        assert_eq!(event.wait(Some(Duration::from_millis(20))), WaitOutcome::TimedOut);
    }

    #[test]
    fn interrupt_takes_priority_over_pending_signal_check() {
        let event = CondvarEvent::new();
        event.interrupt();
        assert_eq!(event.wait(Some(Duration::from_millis(20))), WaitOutcome::Interrupted);
    }
}
