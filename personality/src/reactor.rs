//! Per-socket readiness state: a monotonic event-bit accumulator driven by
//! draining the host's event-selection mechanism (§4.2).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bitflags::bitflags;

use linux_errno::Errno;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetworkEvents: u32 {
        const READ = 0b00001;
        const WRITE = 0b00010;
        const ACCEPT = 0b00100;
        const CONNECT = 0b01000;
        const CLOSE = 0b10000;
    }
}

/// The full interest set every socket registers with the host on creation.
pub const INTEREST_SET: NetworkEvents = NetworkEvents::READ
    .union(NetworkEvents::WRITE)
    .union(NetworkEvents::ACCEPT)
    .union(NetworkEvents::CONNECT)
    .union(NetworkEvents::CLOSE);

/// One bit's worth of per-event error, as the host event-enumeration API
/// reports it (e.g. `WSAEnumNetworkEvents`'s `iErrorCode` array).
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainedEvents {
    pub bits: NetworkEvents,
    pub connect_error: Option<Errno>,
}

/// Anything capable of draining pending host network events for a socket.
/// Implemented by the socket backend; kept as a trait here so the
/// accumulator logic is unit-testable without a real host socket.
pub trait EventDrain {
    fn drain(&self) -> DrainedEvents;
}

/// The shared, process-wide-visible readiness state of one socket. Lives in
/// what the source calls "shared memory" so it survives `fork`; here that's
/// modeled as an `Arc<SocketShared>` held by every SocketFile pointing at
/// the same underlying socket.
#[derive(Debug, Default)]
pub struct SocketShared {
    events: AtomicU32,
    connect_error: Mutex<Option<Errno>>,
}

impl SocketShared {
    pub fn new() -> Self {
        SocketShared { events: AtomicU32::new(0), connect_error: Mutex::new(None) }
    }

    pub fn current(&self) -> NetworkEvents {
        NetworkEvents::from_bits_truncate(self.events.load(Ordering::Acquire))
    }

    /// Atomically clears `bit` immediately before issuing a host operation
    /// that would consume the corresponding readiness (§4.2's clearing
    /// protocol). If the host then reports `WOULDBLOCK`, the caller simply
    /// does not re-set the bit — the next drain will reassert it if still
    /// ready.
    pub fn clear(&self, bit: NetworkEvents) {
        self.events.fetch_and(!bit.bits(), Ordering::AcqRel);
    }

    pub fn take_connect_error(&self) -> Option<Errno> {
        self.connect_error.lock().unwrap().take()
    }

    /// Drains pending host events, ORs them into the accumulator, and
    /// surfaces a captured `CONNECT` error when both requested and newly
    /// accumulated. Returns the post-OR event set.
    pub fn update_events(&self, requested: NetworkEvents, source: &dyn EventDrain) -> NetworkEvents {
        let drained = source.drain();
        let previous = self.events.fetch_or(drained.bits.bits(), Ordering::AcqRel);
        let now = NetworkEvents::from_bits_truncate(previous | drained.bits.bits());

        if requested.contains(NetworkEvents::CONNECT) && now.contains(NetworkEvents::CONNECT) {
            if let Some(err) = drained.connect_error {
                *self.connect_error.lock().unwrap() = Some(err);
            }
            self.clear(NetworkEvents::CONNECT);
            return now.difference(NetworkEvents::CONNECT);
        }
        now
    }
}

/// Outcome of [`wait_event`], distinguishing "became ready" from the two
/// ways a wait can fail to produce readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEventOutcome {
    Ready(NetworkEvents),
    WouldBlock,
}

/// Implements the wait helper from §4.2: poll via `update_events`, and if
/// nothing required is ready, either report `WouldBlock` (non-blocking
/// descriptor) or block on `wait` until re-polling makes sense.
///
/// The caller supplies `poll_again` as the hook invoked after a wait
/// returns `Woken`/`TimedOut` (both cases re-check; a timeout is reported to
/// the caller only if re-checking still finds nothing).
pub fn wait_event(
    shared: &SocketShared,
    required: NetworkEvents,
    nonblocking: bool,
    source: &dyn EventDrain,
    waiter: &dyn crate::host::wait::InterruptibleWait,
    timeout: Option<std::time::Duration>,
) -> Result<WaitEventOutcome, Errno> {
    use crate::host::wait::WaitOutcome;

    loop {
        let now = shared.update_events(required, source);
        if now.intersects(required) {
            return Ok(WaitEventOutcome::Ready(now));
        }
        if nonblocking {
            return Ok(WaitEventOutcome::WouldBlock);
        }
        match waiter.wait(timeout) {
            WaitOutcome::Woken => continue,
            WaitOutcome::TimedOut => {
                let now = shared.update_events(required, source);
                if now.intersects(required) {
                    return Ok(WaitEventOutcome::Ready(now));
                }
                return Err(Errno::ETIMEDOUT);
            }
            WaitOutcome::Interrupted => return Err(Errno::EINTR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FixedDrain(RefCell<Vec<DrainedEvents>>);

    impl EventDrain for FixedDrain {
        fn drain(&self) -> DrainedEvents {
            self.0.borrow_mut().pop().unwrap_or_default()
        }
    }

    #[test]
    fn events_accumulate_monotonically_until_cleared() {
        let shared = SocketShared::new();
        let drain = FixedDrain(RefCell::new(vec![DrainedEvents { bits: NetworkEvents::READ, ..Default::default() }]));
        let after = shared.update_events(NetworkEvents::READ, &drain);
        assert!(after.contains(NetworkEvents::READ));
        // A second drain with nothing new still reports READ as set.
        let drain2 = FixedDrain(RefCell::new(vec![DrainedEvents::default()]));
        let still = shared.update_events(NetworkEvents::READ, &drain2);
        assert!(still.contains(NetworkEvents::READ));
    }

    #[test]
    fn clear_removes_exactly_one_bit() {
        let shared = SocketShared::new();
        let drain = FixedDrain(RefCell::new(vec![DrainedEvents {
            bits: NetworkEvents::READ | NetworkEvents::WRITE,
            ..Default::default()
        }]));
        shared.update_events(NetworkEvents::READ | NetworkEvents::WRITE, &drain);
        shared.clear(NetworkEvents::READ);
        let now = shared.current();
        assert!(!now.contains(NetworkEvents::READ));
        assert!(now.contains(NetworkEvents::WRITE));
    }

    #[test]
    fn connect_error_is_captured_and_connect_bit_cleared() {
        let shared = SocketShared::new();
        let drain = FixedDrain(RefCell::new(vec![DrainedEvents {
            bits: NetworkEvents::CONNECT,
            connect_error: Some(Errno::ECONNREFUSED),
        }]));
        let now = shared.update_events(NetworkEvents::CONNECT, &drain);
        assert!(!now.contains(NetworkEvents::CONNECT));
        assert_eq!(shared.take_connect_error(), Some(Errno::ECONNREFUSED));
    }

    #[test]
    fn connect_bit_is_left_alone_when_not_requested() {
        let shared = SocketShared::new();
        let drain = FixedDrain(RefCell::new(vec![DrainedEvents {
            bits: NetworkEvents::CONNECT,
            connect_error: Some(Errno::ECONNREFUSED),
        }]));
        let now = shared.update_events(NetworkEvents::READ, &drain);
        assert!(now.contains(NetworkEvents::CONNECT));
        assert_eq!(shared.take_connect_error(), None);
    }
}
