//! SIGINT handling shared by the long-running commands.

use std::sync::atomic::{AtomicBool, Ordering};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
    }
}

pub fn running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}
