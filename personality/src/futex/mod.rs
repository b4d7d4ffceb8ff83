//! Futex core: hash-bucketed wait queues backing `WAIT`/`WAKE`/`REQUEUE`/
//! `CMP_REQUEUE` (§4.5), plus the `set_robust_list` stub (§4.6).

pub mod bucket;
pub mod syscall;

pub use syscall::Futex;
