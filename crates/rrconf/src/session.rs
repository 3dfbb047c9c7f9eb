//! Process lifetime and the post-apply confirmation countdown.

use std::sync::atomic::{AtomicBool, Ordering};

static RUNNING: AtomicBool = AtomicBool::new(true);

pub fn is_running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

pub fn request_shutdown() {
    RUNNING.store(false, Ordering::SeqCst);
}

pub fn setup_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as usize;
        sa.sa_flags = libc::SA_RESTART;

        libc::sigemptyset(&mut sa.sa_mask);

        if libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut()) < 0 {
            return Err("Failed to set SIGINT handler".into());
        }
        if libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut()) < 0 {
            return Err("Failed to set SIGTERM handler".into());
        }
        if libc::sigaction(libc::SIGHUP, &sa, std::ptr::null_mut()) < 0 {
            return Err("Failed to set SIGHUP handler".into());
        }
    }
    Ok(())
}

extern "C" fn signal_handler(_sig: i32) {
    request_shutdown();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running { remaining: u32 },
    /// The countdown ran out; the caller reverts.
    Expired,
}

/// Time-boxed confirmation of an applied layout. Ticked once a second.
#[derive(Debug, Default)]
pub struct ConfirmCountdown {
    remaining: Option<u32>,
}

impl ConfirmCountdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, secs: u32) {
        log::info!("Waiting {}s for confirmation", secs);
        self.remaining = Some(secs);
    }

    pub fn is_active(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn tick(&mut self) -> CountdownState {
        match self.remaining {
            None => CountdownState::Idle,
            Some(0) | Some(1) => {
                self.remaining = None;
                log::info!("Confirmation timed out");
                CountdownState::Expired
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                CountdownState::Running { remaining: n - 1 }
            }
        }
    }

    /// Returns false if there was nothing to confirm.
    pub fn confirm(&mut self) -> bool {
        let was_active = self.remaining.take().is_some();
        if was_active {
            log::info!("Layout confirmed");
        }
        was_active
    }

    pub fn cancel(&mut self) {
        self.remaining = None;
    }
}
