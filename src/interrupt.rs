//! Scoped SIGINT disposition used while a blocking connect is in progress.

/// Installs the default SIGINT disposition on creation and puts the previous
/// one back when dropped, whichever way the guarded scope is left.
///
/// Guards are counted process-wide: the first live guard saves the action
/// and the last one to drop restores it, in whatever order they drop.
#[cfg(unix)]
pub struct InterruptGuard {
    _private: (),
}

#[cfg(unix)]
struct Saved {
    depth: usize,
    previous: Option<libc::sigaction>,
}

#[cfg(unix)]
static SAVED: std::sync::Mutex<Saved> = std::sync::Mutex::new(Saved {
    depth: 0,
    previous: None,
});

#[cfg(unix)]
fn lock_saved() -> std::sync::MutexGuard<'static, Saved> {
    SAVED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(unix)]
impl InterruptGuard {
    pub fn default_handling() -> Self {
        let mut saved = lock_saved();
        if saved.depth == 0 {
            // SAFETY: sigaction is plain old data and the all-zero pattern is
            // a valid empty action; both pointers are to live stack values.
            saved.previous = unsafe {
                let mut default: libc::sigaction = std::mem::zeroed();
                default.sa_sigaction = libc::SIG_DFL;
                libc::sigemptyset(&mut default.sa_mask);
                let mut previous: libc::sigaction = std::mem::zeroed();
                if libc::sigaction(libc::SIGINT, &default, &mut previous) == 0 {
                    Some(previous)
                } else {
                    None
                }
            };
            if saved.previous.is_none() {
                tracing::warn!("could not reset SIGINT handling for connect");
            }
        }
        saved.depth += 1;
        Self { _private: () }
    }
}

#[cfg(unix)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let mut saved = lock_saved();
        saved.depth -= 1;
        if saved.depth > 0 {
            return;
        }
        if let Some(previous) = saved.previous.take() {
            // SAFETY: restores an action previously returned by sigaction.
            unsafe {
                libc::sigaction(libc::SIGINT, &previous, std::ptr::null_mut());
            }
        }
    }
}

#[cfg(not(unix))]
pub struct InterruptGuard;

#[cfg(not(unix))]
impl InterruptGuard {
    pub fn default_handling() -> Self {
        InterruptGuard
    }
}
