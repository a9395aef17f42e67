//! SIGHUP wiring for policy reload. The handler only flips an atomic;
//! the serve loop picks it up between requests, so reload never races a
//! scan in progress.

use std::sync::atomic::AtomicBool;

pub static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
pub fn install_sighup() {
    unsafe {
        let handler = on_sighup as extern "C" fn(libc::c_int);
        libc::signal(libc::SIGHUP, handler as libc::sighandler_t);
    }
}

#[cfg(unix)]
extern "C" fn on_sighup(_signal: libc::c_int) {
    RELOAD_REQUESTED.store(true, std::sync::atomic::Ordering::SeqCst);
}

#[cfg(not(unix))]
pub fn install_sighup() {}
