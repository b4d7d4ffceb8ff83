//! POSIX timer and `setitimer` family stubs (§4.6). Out of scope for real
//! implementation, but the syscall surface must answer rather than be
//! unreachable.

use linux_errno::Errno;

/// Mirrors `struct itimerspec`'s two `timespec` fields, zeroed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ITimerSpec {
    pub interval_sec: i64,
    pub interval_nsec: i64,
    pub value_sec: i64,
    pub value_nsec: i64,
}

/// `timer_create`: always succeeds, handing back an arbitrary stable id.
pub fn do_timer_create() -> Result<i32, Errno> {
    log::debug!("timer_create: stub, returning dummy timer id");
    Ok(0)
}

/// `timer_settime`: succeeds, reporting the previous value as all-zero.
pub fn do_timer_settime(_timer_id: i32, _new_value: ITimerSpec) -> Result<ITimerSpec, Errno> {
    log::debug!("timer_settime: stub, no timer actually armed");
    Ok(ITimerSpec::default())
}

/// `timer_gettime`: always reports a disarmed timer.
pub fn do_timer_gettime(_timer_id: i32) -> Result<ITimerSpec, Errno> {
    Ok(ITimerSpec::default())
}

/// `timer_delete`: always succeeds.
pub fn do_timer_delete(_timer_id: i32) -> Result<(), Errno> {
    Ok(())
}

/// `setitimer`: succeeds, reporting the previous value as all-zero.
pub fn do_setitimer(_which: i32, _new_value: ITimerSpec) -> Result<ITimerSpec, Errno> {
    log::debug!("setitimer: stub, no interval timer actually armed");
    Ok(ITimerSpec::default())
}

/// `getitimer`: always reports a disarmed timer.
pub fn do_getitimer(_which: i32) -> Result<ITimerSpec, Errno> {
    Ok(ITimerSpec::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_create_succeeds() {
        assert!(do_timer_create().is_ok());
    }

    #[test]
    fn gettime_reports_a_disarmed_timer() {
        assert_eq!(do_timer_gettime(0).unwrap(), ITimerSpec::default());
    }

    #[test]
    fn setitimer_reports_zeroed_previous_value() {
        let prev = do_setitimer(0, ITimerSpec { interval_sec: 1, ..Default::default() }).unwrap();
        assert_eq!(prev, ITimerSpec::default());
    }
}
