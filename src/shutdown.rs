//! Interrupt handling for orderly shutdown.
//!
//! SIGINT and SIGTERM are routed to a shared flag that the server loop
//! checks between cycles. The handler itself does nothing but set the
//! flag; all teardown happens on the main thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_interrupt(_sig: libc::c_int) {
    // Async-signal-safe: a load and a store, nothing else.
    if let Some(flag) = INTERRUPT_FLAG.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Route SIGINT and SIGTERM to `flag`.
///
/// Handlers are registered with `sigaction` and `sa_flags = 0`. Without
/// SA_RESTART an interrupted blocking `accept` returns EINTR, which is how
/// the server notices the flag while suspended with no sessions connected.
pub fn install(flag: Arc<AtomicBool>) -> io::Result<()> {
    INTERRUPT_FLAG.set(flag).map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            "interrupt handler already installed",
        )
    })?;

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_sigaction = handle_interrupt as usize;
        action.sa_flags = 0;

        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    Ok(())
}
