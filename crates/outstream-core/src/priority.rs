//! Real-time scheduling for write threads
//!
//! With the `embedded-rt` feature on Linux the write thread asks for
//! `SCHED_FIFO`. Without `CAP_SYS_NICE` the request fails and the thread keeps
//! running under the default policy.

/// `SCHED_FIFO` priority requested for write threads (1-99)
#[cfg(all(feature = "embedded-rt", target_os = "linux"))]
const WRITE_THREAD_RT_PRIORITY: i32 = 50;

/// Raise the calling thread to audio priority; returns whether it took effect
#[cfg(all(feature = "embedded-rt", target_os = "linux"))]
pub(crate) fn raise_current_thread_priority() -> bool {
    // SAFETY: sched_param is plain data; all-zero is a valid value
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = WRITE_THREAD_RT_PRIORITY;

    // SAFETY: pid 0 targets the calling thread and `param` outlives the call
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if result == 0 {
        log::info!(
            "WriteThread: SCHED_FIFO priority {} enabled",
            WRITE_THREAD_RT_PRIORITY
        );
        true
    } else {
        log::warn!(
            "WriteThread: SCHED_FIFO unavailable ({}), keeping default priority",
            std::io::Error::last_os_error()
        );
        false
    }
}

#[cfg(not(all(feature = "embedded-rt", target_os = "linux")))]
pub(crate) fn raise_current_thread_priority() -> bool {
    log::debug!("WriteThread: real-time priority not enabled in this build");
    false
}
