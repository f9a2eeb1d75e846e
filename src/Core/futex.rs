use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use super::interrupt::CancelToken;

/// Longest single sleep inside [`wait_until`]. Bounds how late a cancelled
/// token is noticed by a sleeping waiter.
pub const WAIT_SLICE: Duration = Duration::from_millis(10);

// The wake words live in a MAP_SHARED region, so FUTEX_PRIVATE_FLAG must not
// be used: waiters in other processes hash on the physical page.
#[cfg(target_os = "linux")]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    use std::ptr;

    // Check condition first to avoid syscall if possible
    if atomic.load(Ordering::Relaxed) != expected {
        return;
    }

    let ts = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs() as libc::time_t,
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |ts| ts as *const libc::timespec);

    // EAGAIN / ETIMEDOUT / EINTR all just send the caller back to its recheck loop
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(target_os = "linux")]
pub fn futex_wake_all(atomic: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    // Fallback for non-Linux: short sleep, caller rechecks
    if atomic.load(Ordering::Relaxed) != expected {
        return;
    }
    let nap = timeout.unwrap_or(WAIT_SLICE).min(Duration::from_micros(200));
    std::thread::sleep(nap);
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_atomic: &AtomicU32) {
    // Sleepers poll on their own
}

/// Bump a wake word and wake everything sleeping on it.
#[inline]
pub fn signal(word: &AtomicU32) {
    word.fetch_add(1, Ordering::Release);
    futex_wake_all(word);
}

/// How a [`wait_until`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    Interrupted,
    WouldBlock,
}

/// When a waiter gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Fail immediately if the condition does not already hold.
    NonBlocking,
    /// Sleep until ready or interrupted.
    Blocking,
    /// Sleep until ready, interrupted, or the deadline passes.
    Deadline(Instant),
}

/// Sleep on `word` until `ready()` holds.
///
/// The wake word is sampled before the condition is evaluated and the futex
/// only sleeps while it still holds that sample, so a wake issued between the
/// check and the sleep is never lost. The condition is re-evaluated after
/// every wake-up.
pub fn wait_until<F>(word: &AtomicU32, mode: WaitMode, cancel: &CancelToken, mut ready: F) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    loop {
        let seen = word.load(Ordering::Acquire);
        if ready() {
            return WaitOutcome::Ready;
        }

        let slice = match mode {
            WaitMode::NonBlocking => return WaitOutcome::WouldBlock,
            WaitMode::Blocking => WAIT_SLICE,
            WaitMode::Deadline(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                (deadline - now).min(WAIT_SLICE)
            }
        };

        if cancel.is_cancelled() {
            return WaitOutcome::Interrupted;
        }

        futex_wait(word, seen, Some(slice));
    }
}
